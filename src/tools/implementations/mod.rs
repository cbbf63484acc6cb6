//! Built-in tool adapters

pub mod filesystem;
pub mod process;
pub mod tabular;
pub mod web;

pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
pub use process::ShellTool;
pub use tabular::{CsvDescribeTool, CsvReadRowsTool};
pub use web::{FetchPageTool, TavilySearchTool, WikipediaSearchTool};
