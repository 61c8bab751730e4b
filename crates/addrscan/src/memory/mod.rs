#[cfg(target_os = "windows")]
mod process;
mod reader;

#[cfg(test)]
pub mod mock;

#[cfg(target_os = "windows")]
pub use process::ProcessHandle;
pub use reader::{ByteBuffer, ReadMemory};

#[cfg(test)]
pub use mock::{MockMemoryBuilder, MockMemoryReader};
