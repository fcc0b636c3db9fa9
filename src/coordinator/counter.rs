// SPDX-License-Identifier: BSD-3-Clause

//! The exposure counter (§4.7 steps 4-7, §6.2): a single ASCII decimal
//! integer in `<data_dir>/nextExposureNumber`, guarded by an exclusive
//! non-blocking advisory lock so two cooperating processes never hand out
//! the same exposure number.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use fs2::FileExt;

use crate::error::CoreError;

/// An open, exclusively-locked handle on the counter file. Dropping it
/// releases the lock (fs2's lock is tied to the file descriptor's lifetime).
pub struct ExposureCounter {
    file: File,
}

impl ExposureCounter {
    /// Opens (creating if missing) and locks `data_dir/nextExposureNumber`.
    /// Fails immediately with [`CoreError::CounterLocked`] on contention —
    /// this step never blocks waiting for the lock.
    pub fn open(data_dir: &Path) -> Result<Self, CoreError> {
        let path = data_dir.join("nextExposureNumber");
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| CoreError::CounterLocked)?;
        Ok(Self { file })
    }

    /// Reads the current exposure number; an empty file means 1.
    pub fn read(&mut self) -> Result<u64, CoreError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut text = String::new();
        self.file.read_to_string(&mut text)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(1);
        }
        trimmed
            .parse::<u64>()
            .map_err(|_| CoreError::BadArg(format!("nextExposureNumber is not an integer: {trimmed:?}")))
    }

    /// Truncates the file and writes `n`, atomically with respect to other
    /// processes holding (or waiting on) this lock.
    pub fn write(&mut self, n: u64) -> Result<(), CoreError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        self.file.write_all(n.to_string().as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

impl Drop for ExposureCounter {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_one() {
        let dir = std::env::temp_dir().join(format!("archon-counter-test-{}-a", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let mut counter = ExposureCounter::open(&dir).expect("open");
        assert_eq!(counter.read().expect("read"), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("archon-counter-test-{}-b", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let mut counter = ExposureCounter::open(&dir).expect("open");
        counter.write(7).expect("write");
        assert_eq!(counter.read().expect("read"), 7);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn second_open_is_counter_locked() {
        let dir = std::env::temp_dir().join(format!("archon-counter-test-{}-c", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let _first = ExposureCounter::open(&dir).expect("open first");
        assert!(matches!(ExposureCounter::open(&dir), Err(CoreError::CounterLocked)));
        std::fs::remove_dir_all(&dir).ok();
    }
}
