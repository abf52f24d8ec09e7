pub mod check_file;
pub mod completion;
pub mod get_doc;
pub mod upsert;
