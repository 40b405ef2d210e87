// SPDX-License-Identifier: MPL-2.0

//! Limits of the semaphore facility and the parsing of their tunables.

use crate::prelude::*;

// The following constant values are derived from the default values in FreeBSD.

/// Maximum number of semaphore sets.
pub const SEMMNI: usize = 50;
/// Maximum number of semaphores in all semaphore sets.
pub const SEMMNS: usize = 340;
/// Maximum number of undo records in the system.
pub const SEMMNU: usize = 150;
/// Maximum number of semaphores per semaphore ID.
pub const SEMMSL: usize = SEMMNS;
/// Maximum number of operations for semop.
pub const SEMOPM: usize = 100;
/// Maximum number of undo entries per actor.
pub const SEMUME: usize = 50;
/// Maximum semaphore value.
pub const SEMVMX: i32 = 32767;
/// Maximum value that can be recorded for semaphore adjustment (SEM_UNDO).
pub const SEMAEM: i32 = 16384;

/// The number of slots that a semaphore ID can address.
const MAX_SEMMNI: usize = 1 << 16;
/// The largest set whose size fits in `sem_nsems`.
const MAX_SEMMSL: usize = u16::MAX as usize;

/// The limits of the semaphore facility, i.e., `struct seminfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemLimits {
    /// Number of semaphore sets (slots).
    pub semmni: usize,
    /// Number of semaphores in the system.
    pub semmns: usize,
    /// Number of undo records in the system.
    pub semmnu: usize,
    /// Maximum number of semaphores per set.
    pub semmsl: usize,
    /// Maximum number of operations per `semop` call.
    pub semopm: usize,
    /// Maximum number of undo entries per actor.
    pub semume: usize,
    /// Maximum semaphore value.
    pub semvmx: i32,
    /// Maximum magnitude of an adjust-on-exit value.
    pub semaem: i32,
}

impl Default for SemLimits {
    fn default() -> Self {
        Self {
            semmni: SEMMNI,
            semmns: SEMMNS,
            semmnu: SEMMNU,
            semmsl: SEMMSL,
            semopm: SEMOPM,
            semume: SEMUME,
            semvmx: SEMVMX,
            semaem: SEMAEM,
        }
    }
}

impl SemLimits {
    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<()> {
        if self.semmni == 0 || self.semmni > MAX_SEMMNI {
            return_errno_with_message!(Errno::EINVAL, "semmni is out of range");
        }
        if self.semmns == 0 || self.semmnu == 0 || self.semopm == 0 || self.semume == 0 {
            return_errno_with_message!(Errno::EINVAL, "a limit is zero");
        }
        check_semmsl(self.semmsl)?;
        check_semvmx(self.semvmx)?;
        check_semaem(self.semaem)?;
        Ok(())
    }

    /// Builds limits from the defaults and the `kern.ipc.*` tunables on a kernel command line.
    ///
    /// Arguments are separated by whitespace; double quotes protect whitespace inside a value.
    /// Arguments that are not `kern.ipc.<limit>=<value>` are ignored, and malformed ones are
    /// skipped with a warning. The result is not validated.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut limits = Self::default();

        for arg in split_arg(cmdline) {
            // Arg => Entry "=" Value
            let Some((entry, value)) = arg.split_once('=') else {
                continue;
            };
            // Entry => "kern" "." "ipc" "." Limit
            let Some(name) = entry.strip_prefix("kern.ipc.") else {
                continue;
            };
            let value = value.trim_matches('"');

            if let Err(err) = limits.set_param(name, value) {
                warn!(
                    "[SemLimits] Unable to parse tunable {}: {}, skip for now",
                    arg, err
                );
            }
        }

        limits
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        fn parse<T: core::str::FromStr>(value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| Error::with_message(Errno::EINVAL, "not a number"))
        }

        match name {
            "semmni" => self.semmni = parse(value)?,
            "semmns" => self.semmns = parse(value)?,
            "semmnu" => self.semmnu = parse(value)?,
            "semmsl" => self.semmsl = parse(value)?,
            "semopm" => self.semopm = parse(value)?,
            "semume" => self.semume = parse(value)?,
            "semvmx" => self.semvmx = parse(value)?,
            "semaem" => self.semaem = parse(value)?,
            _ => return_errno_with_message!(Errno::EINVAL, "unknown tunable"),
        }
        Ok(())
    }
}

pub(super) fn check_semmsl(semmsl: usize) -> Result<()> {
    if semmsl == 0 || semmsl > MAX_SEMMSL {
        return_errno_with_message!(Errno::EINVAL, "semmsl is out of range");
    }
    Ok(())
}

pub(super) fn check_semvmx(semvmx: i32) -> Result<()> {
    if !(1..=SEMVMX).contains(&semvmx) {
        return_errno_with_message!(Errno::EINVAL, "semvmx is out of range");
    }
    Ok(())
}

pub(super) fn check_semaem(semaem: i32) -> Result<()> {
    if !(1..=i16::MAX as i32).contains(&semaem) {
        return_errno_with_message!(Errno::EINVAL, "semaem is out of range");
    }
    Ok(())
}

// Splits the command line string by spaces but preserve
// ones that are protected by double quotes(`"`).
fn split_arg(input: &str) -> impl Iterator<Item = &str> {
    let mut inside_quotes = false;

    input
        .split(move |c: char| {
            if c == '"' {
                inside_quotes = !inside_quotes;
            }

            !inside_quotes && c.is_whitespace()
        })
        .filter(|arg| !arg.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let limits = SemLimits::default();
        assert!(limits.validate().is_ok());
        assert_eq!(limits.semmsl, limits.semmns);
        assert_eq!(limits.semaem, 16384);
    }

    #[test]
    fn cmdline_overrides() {
        let limits = SemLimits::from_cmdline(
            "console=ttyS0 kern.ipc.semmni=8 kern.ipc.semume=\"4\"  kern.ipc.semvmx=100 -- init",
        );

        assert_eq!(limits.semmni, 8);
        assert_eq!(limits.semume, 4);
        assert_eq!(limits.semvmx, 100);
        assert_eq!(limits.semmns, SEMMNS);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn cmdline_skips_malformed() {
        let limits =
            SemLimits::from_cmdline("kern.ipc.semmni=lots kern.ipc.bogus=1 kern.ipc.semopm");
        assert_eq!(limits, SemLimits::default());
    }

    #[test]
    fn invalid_limits() {
        let limits = SemLimits {
            semvmx: 40000,
            ..SemLimits::default()
        };
        assert_eq!(limits.validate().unwrap_err().error(), Errno::EINVAL);

        let limits = SemLimits {
            semmni: 0,
            ..SemLimits::default()
        };
        assert!(limits.validate().is_err());

        let limits = SemLimits {
            semaem: 0,
            ..SemLimits::default()
        };
        assert!(limits.validate().is_err());

        let limits = SemLimits {
            semmsl: 1 << 16,
            ..SemLimits::default()
        };
        assert!(limits.validate().is_err());
        let limits = SemLimits {
            semmsl: u16::MAX as usize,
            ..SemLimits::default()
        };
        assert!(limits.validate().is_ok());
    }
}
