pub mod client;
pub mod service;

use blocking::Unblock;
use futures_lite::io::{AsyncBufReadExt, BufReader, Lines};

/// Line-by-line reader over the process's stdin
pub fn stdin_lines() -> Lines<BufReader<Unblock<std::io::Stdin>>> {
    BufReader::new(Unblock::new(std::io::stdin())).lines()
}
