pub mod db;
pub mod explain_llm;
pub mod ocr_llm;
pub mod offline;

pub use db::DbAdapter;
pub use explain_llm::OpenAiExplanationAdapter;
pub use ocr_llm::OpenAiOcrAdapter;
pub use offline::{OfflineExplainer, OfflineTextExtractor};
