//! Deferred enforcement.
//!
//! With `--no-enforce-on-startup` the target runs unrestricted until something
//! flips the [`Enforcement`] switch; `--trigger-enforce-on-log-match` flips it
//! when a line of the target's output contains a given text (e.g. a server
//! announcing it finished initialising).

use std::{
    io::{BufRead, BufReader, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::{info, warn};

/// Shared on/off switch read by the policy engine on every decision.
#[derive(Debug, Clone, Default)]
pub struct Enforcement(Arc<AtomicBool>);

impl Enforcement {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `true` if this call turned enforcement on.
    pub fn activate(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Forward `reader` to `writer` line by line and activate `enforcement` on the
/// first line containing `needle`. Output is passed through byte for byte.
pub fn watch_output<R, W>(
    reader: R,
    mut writer: W,
    needle: String,
    enforcement: Enforcement,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if !enforcement.is_active()
                        && String::from_utf8_lossy(&line).contains(needle.as_str())
                        && enforcement.activate()
                    {
                        info!(trigger = %needle, "enforcement activated by target output");
                    }
                    if writer.write_all(&line).and_then(|_| writer.flush()).is_err() {
                        // keep draining so the target never blocks on a full pipe
                        continue;
                    }
                }
                Err(e) => {
                    warn!("reading target output failed: {e}");
                    break;
                }
            }
        }
    })
}
