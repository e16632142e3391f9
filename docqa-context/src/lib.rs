pub mod text;

// Re-export the splitter for external use
pub use text::{DEFAULT_SEPARATORS, RecursiveTextSplitter, SplitterError, TextChunk};
