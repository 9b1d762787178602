use std::cmp;
use std::io::{self, Write};

/// Carriage-return progress bar on stdout.
pub(crate) struct ProgressBar {
    total: u64,
}

impl ProgressBar {
    const WIDTH: u64 = 60;

    pub(crate) fn new(total: u64) -> Self {
        ProgressBar { total }
    }

    pub(crate) fn update(&self, done: u64) {
        let total = cmp::max(self.total, 1);
        let done = cmp::min(done, total);
        let filled = ((Self::WIDTH * done) / total) as usize;
        print!(
            "\r  {:3}% [{}{}] {}/{}",
            (100 * done) / total,
            "#".repeat(filled),
            " ".repeat(Self::WIDTH as usize - filled),
            done,
            self.total,
        );
        let _ = io::stdout().flush();
        if done >= self.total {
            println!();
        }
    }

    /// Terminate the bar line when the final size was not known up front.
    pub(crate) fn finish(&self) {
        println!();
    }
}
