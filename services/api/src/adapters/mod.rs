pub mod db;
pub mod decision_llm;
pub mod extraction_llm;
pub mod hr_sync;
pub mod messaging;
pub mod reference;
