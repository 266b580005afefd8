//! Opt-in raw-traffic capture.
//!
//! Every byte that crosses a [`super::Buffer`] or [`super::CircularBuffer`]
//! can be teed to a raw log file, with a companion "roll" log recording each
//! socket-boundary fragment (`SOM`/`EOM`, total bytes sent so far, fragment
//! size) so an operator can reconstruct application-level framing from
//! kernel-level framing after the fact.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A pair of append-only files: the raw byte stream and a roll log of
/// fragment boundaries.
pub struct RawLog {
    raw: File,
    roll: File,
    total_in: u64,
    total_out: u64,
}

impl RawLog {
    /// Open (creating if needed) `<dir>/<name>.raw` and `<dir>/<name>.roll`.
    pub fn open(dir: &Path, name: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let raw = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{name}.raw")))?;
        let roll = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{name}.roll")))?;
        Ok(Self {
            raw,
            roll,
            total_in: 0,
            total_out: 0,
        })
    }

    pub fn tee_inbound(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.tee(Direction::Inbound, bytes)
    }

    pub fn tee_outbound(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.tee(Direction::Outbound, bytes)
    }

    fn tee(&mut self, dir: Direction, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.raw.write_all(bytes)?;
        let total = match dir {
            Direction::Inbound => {
                self.total_in += bytes.len() as u64;
                self.total_in
            }
            Direction::Outbound => {
                self.total_out += bytes.len() as u64;
                self.total_out
            }
        };
        let tag = match dir {
            Direction::Inbound => "IN",
            Direction::Outbound => "OUT",
        };
        writeln!(
            self.roll,
            "SOM {tag} total={total} frag={}",
            bytes.len()
        )?;
        writeln!(self.roll, "EOM {tag}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_log_writes_bytes_and_roll_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RawLog::open(dir.path(), "chan0").unwrap();
        log.tee_inbound(b"hello").unwrap();
        log.tee_outbound(b"world!").unwrap();
        let raw = std::fs::read(dir.path().join("chan0.raw")).unwrap();
        assert_eq!(raw, b"helloworld!");
        let roll = std::fs::read_to_string(dir.path().join("chan0.roll")).unwrap();
        assert!(roll.contains("SOM IN total=5 frag=5"));
        assert!(roll.contains("SOM OUT total=6 frag=6"));
    }

    #[test]
    fn raw_log_tracks_cumulative_totals_per_direction() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RawLog::open(dir.path(), "chan1").unwrap();
        log.tee_inbound(b"ab").unwrap();
        log.tee_inbound(b"cde").unwrap();
        let roll = std::fs::read_to_string(dir.path().join("chan1.roll")).unwrap();
        assert!(roll.contains("total=2 frag=2"));
        assert!(roll.contains("total=5 frag=3"));
    }

    #[test]
    fn raw_log_skips_empty_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RawLog::open(dir.path(), "chan2").unwrap();
        log.tee_inbound(&[]).unwrap();
        let roll = std::fs::read_to_string(dir.path().join("chan2.roll")).unwrap();
        assert!(roll.is_empty());
    }
}
