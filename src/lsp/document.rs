/// State for each open document
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub content: String,
    pub version: i32,
}
