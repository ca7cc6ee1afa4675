//! Status output and the yes/no confirmation before the MBR is written.

use std::io::{self, BufRead, Write};

use crate::error::SyncError;
use crate::sync::classify::ClassifiedPartition;
use crate::sync::compose::HybridMbr;
use crate::sync::diff::render_table;

pub trait Console {
    /// Print a status line.
    fn report(&mut self, message: &str);

    /// Ask a yes/no question. Anything but an answer starting with `y`/`Y`
    /// is a no; end of input is an error.
    fn confirm(&mut self, prompt: &str) -> Result<bool, SyncError>;

    /// Show the proposed table before asking for confirmation. `partitions`
    /// is the classified GPT the table was built from.
    fn show_table(&mut self, _partitions: &[ClassifiedPartition<'_>], table: &HybridMbr) {
        self.report("\nProposed new MBR partition table:");
        self.report(render_table(table).trim_end());
    }
}

/// Console on a pair of streams, normally stdin/stdout.
pub struct Terminal<R, W> {
    input: R,
    output: W,
    assume_yes: bool,
    json: bool,
}

impl Terminal<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio(assume_yes: bool, json: bool) -> Self {
        Self::new(io::stdin().lock(), io::stdout(), assume_yes, json)
    }
}

impl<R: BufRead, W: Write> Terminal<R, W> {
    pub fn new(input: R, output: W, assume_yes: bool, json: bool) -> Self {
        Self {
            input,
            output,
            assume_yes,
            json,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Console for Terminal<R, W> {
    fn report(&mut self, message: &str) {
        // A closed stdout must not abort a run that is about to write the disk.
        if let Err(e) = writeln!(self.output, "{message}") {
            log::warn!("Failed to write to console: {e}");
        }
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool, SyncError> {
        write!(self.output, "{prompt}")?;
        if self.assume_yes {
            writeln!(self.output, "Yes")?;
            return Ok(true);
        }
        self.output.flush()?;

        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no answer on standard input",
            )));
        }
        let yes = answer.trim_start().starts_with(['y', 'Y']);
        writeln!(self.output, "{}", if yes { "Yes" } else { "No" })?;
        Ok(yes)
    }

    fn show_table(&mut self, partitions: &[ClassifiedPartition<'_>], table: &HybridMbr) {
        self.report("\nProposed new MBR partition table:");
        self.report(render_table(table).trim_end());
        if self.json {
            let dump = serde_json::json!({ "gpt": partitions, "mbr": table });
            match serde_json::to_string_pretty(&dump) {
                Ok(json) => self.report(&json),
                Err(e) => log::warn!("Failed to serialize table: {e}"),
            }
        }
    }
}
