//! REST collaborator holding the live school data.

use crate::model::{MobileResult, Student, Subject, Teacher};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no api base url configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("api answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// The server understood the request and refused it; the link is fine.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Status { status, .. }
            if (400..500).contains(status) && *status != 408 && *status != 429)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub trait SchoolApi: Send + Sync {
    fn ping(&self) -> ApiResult<()>;

    fn list_students(&self) -> ApiResult<Vec<Student>>;
    fn create_student(&self, student: &Student) -> ApiResult<Student>;
    fn update_student(&self, matricule: &str, student: &Student) -> ApiResult<Student>;
    fn delete_student(&self, matricule: &str) -> ApiResult<()>;

    fn list_subjects(&self) -> ApiResult<Vec<Subject>>;
    fn create_subject(&self, subject: &Subject) -> ApiResult<Subject>;
    fn update_subject(&self, code: &str, subject: &Subject) -> ApiResult<Subject>;
    fn delete_subject(&self, code: &str) -> ApiResult<()>;

    fn list_teachers(&self) -> ApiResult<Vec<Teacher>>;
    fn create_teacher(&self, teacher: &Teacher) -> ApiResult<Teacher>;
    fn update_teacher(&self, id: &str, teacher: &Teacher) -> ApiResult<Teacher>;
    fn delete_teacher(&self, id: &str) -> ApiResult<()>;

    /// Mobile (OCR-corrected) grade submissions.
    fn list_results(&self) -> ApiResult<Vec<MobileResult>>;
}

/// Used when no base URL is configured: every call fails.
pub struct OfflineApi;

impl SchoolApi for OfflineApi {
    fn ping(&self) -> ApiResult<()> {
        Err(ApiError::NotConfigured)
    }
    fn list_students(&self) -> ApiResult<Vec<Student>> {
        Err(ApiError::NotConfigured)
    }
    fn create_student(&self, _: &Student) -> ApiResult<Student> {
        Err(ApiError::NotConfigured)
    }
    fn update_student(&self, _: &str, _: &Student) -> ApiResult<Student> {
        Err(ApiError::NotConfigured)
    }
    fn delete_student(&self, _: &str) -> ApiResult<()> {
        Err(ApiError::NotConfigured)
    }
    fn list_subjects(&self) -> ApiResult<Vec<Subject>> {
        Err(ApiError::NotConfigured)
    }
    fn create_subject(&self, _: &Subject) -> ApiResult<Subject> {
        Err(ApiError::NotConfigured)
    }
    fn update_subject(&self, _: &str, _: &Subject) -> ApiResult<Subject> {
        Err(ApiError::NotConfigured)
    }
    fn delete_subject(&self, _: &str) -> ApiResult<()> {
        Err(ApiError::NotConfigured)
    }
    fn list_teachers(&self) -> ApiResult<Vec<Teacher>> {
        Err(ApiError::NotConfigured)
    }
    fn create_teacher(&self, _: &Teacher) -> ApiResult<Teacher> {
        Err(ApiError::NotConfigured)
    }
    fn update_teacher(&self, _: &str, _: &Teacher) -> ApiResult<Teacher> {
        Err(ApiError::NotConfigured)
    }
    fn delete_teacher(&self, _: &str) -> ApiResult<()> {
        Err(ApiError::NotConfigured)
    }
    fn list_results(&self) -> ApiResult<Vec<MobileResult>> {
        Err(ApiError::NotConfigured)
    }
}

pub struct HttpSchoolApi {
    client: Client,
    base_url: String,
}

impl HttpSchoolApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: Response) -> ApiResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ApiError::Status {
                status: response.status().as_u16(),
                message: response.text().unwrap_or_default(),
            })
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::check(response)?
            .json()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::check(response)?
            .json()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn put_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        let response = self
            .client
            .put(self.url(path))
            .json(body)
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::check(response)?
            .json()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn delete(&self, path: &str) -> ApiResult<()> {
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::check(response).map(|_| ())
    }
}

/// `/{collection}/{id}` with the id percent-encoded as one path segment.
fn item_path(collection: &str, id: &str) -> String {
    format!("/{}/{}", collection, urlencoding::encode(id))
}

impl SchoolApi for HttpSchoolApi {
    fn ping(&self) -> ApiResult<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::check(response).map(|_| ())
    }

    fn list_students(&self) -> ApiResult<Vec<Student>> {
        self.get_json("/students")
    }
    fn create_student(&self, student: &Student) -> ApiResult<Student> {
        self.post_json("/students", student)
    }
    fn update_student(&self, matricule: &str, student: &Student) -> ApiResult<Student> {
        self.put_json(&item_path("students", matricule), student)
    }
    fn delete_student(&self, matricule: &str) -> ApiResult<()> {
        self.delete(&item_path("students", matricule))
    }

    fn list_subjects(&self) -> ApiResult<Vec<Subject>> {
        self.get_json("/subjects")
    }
    fn create_subject(&self, subject: &Subject) -> ApiResult<Subject> {
        self.post_json("/subjects", subject)
    }
    fn update_subject(&self, code: &str, subject: &Subject) -> ApiResult<Subject> {
        self.put_json(&item_path("subjects", code), subject)
    }
    fn delete_subject(&self, code: &str) -> ApiResult<()> {
        self.delete(&item_path("subjects", code))
    }

    fn list_teachers(&self) -> ApiResult<Vec<Teacher>> {
        self.get_json("/teachers")
    }
    fn create_teacher(&self, teacher: &Teacher) -> ApiResult<Teacher> {
        self.post_json("/teachers", teacher)
    }
    fn update_teacher(&self, id: &str, teacher: &Teacher) -> ApiResult<Teacher> {
        self.put_json(&item_path("teachers", id), teacher)
    }
    fn delete_teacher(&self, id: &str) -> ApiResult<()> {
        self.delete(&item_path("teachers", id))
    }

    fn list_results(&self) -> ApiResult<Vec<MobileResult>> {
        self.get_json("/results")
    }
}
