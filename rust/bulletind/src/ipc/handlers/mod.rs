pub mod archive;
pub mod connectivity;
pub mod core;
pub mod grades;
pub mod stats;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod years;
