// SPDX-License-Identifier: MPL-2.0

/// Error number.
///
/// Only the codes that the semaphore facility can report are listed. The
/// numbering follows Linux so that the raw entry layer can hand them back
/// to user space unchanged.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    ENOENT = 2,  /* No such file or directory */
    EINTR = 4,   /* Interrupted system call */
    E2BIG = 7,   /* Argument list too long */
    EAGAIN = 11, /* Try again */
    EACCES = 13, /* Permission denied */
    EFAULT = 14, /* Bad address */
    EEXIST = 17, /* File exists */
    EINVAL = 22, /* Invalid argument */
    EFBIG = 27,  /* File too large */
    ENOSPC = 28, /* No space left on device */
    ERANGE = 34, /* Math result not representable */
    ENOSYS = 38, /* Invalid system call number */
    EIDRM = 43,  /* Identifier removed */
}

/// error used in this crate
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }

    pub const fn message(&self) -> Option<&'static str> {
        self.msg
    }
}

impl PartialEq for Error {
    /// Two errors are equal if they carry the same error number.
    ///
    /// The message is a diagnostic aid and does not take part in the comparison.
    fn eq(&self, other: &Self) -> bool {
        self.errno == other.errno
    }
}

impl Eq for Error {}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<int_to_c_enum::TryFromIntError> for Error {
    fn from(_: int_to_c_enum::TryFromIntError) -> Self {
        Error::with_message(Errno::EINVAL, "Invalid enum value")
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{:?}: {}", self.errno, msg),
            None => write!(f, "{:?}", self.errno),
        }
    }
}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return Err($crate::error::Error::with_message($errno, $message))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numbering_and_display() {
        assert_eq!(Errno::EAGAIN as i32, 11);
        assert_eq!(Errno::EIDRM as i32, 43);

        let err = Error::with_message(Errno::ERANGE, "semaphore value out of range");
        assert_eq!(
            alloc::format!("{}", err),
            "ERANGE: semaphore value out of range"
        );
        assert_eq!(alloc::format!("{}", Error::new(Errno::EINTR)), "EINTR");
        assert_eq!(err, Error::new(Errno::ERANGE));
    }
}
