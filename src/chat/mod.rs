pub mod contacts;
pub mod history;
pub mod node;

pub use contacts::ContactBook;
pub use history::MessageLog;
pub use node::{ChatNode, NodeDeps};
