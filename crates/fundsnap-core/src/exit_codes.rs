//! Process exit codes for the `fundsnap` binary.
//!
//! Schedulers only distinguish success from failure. The failure category is
//! carried by the `code` field of the final log line instead.

/// Exit codes for fundsnap runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Run completed, including runs with no new data
    Success = 0,

    /// Any failure: configuration, fetch, or snapshot write
    Failure = 1,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl<T> From<&fundsnap_common::Result<T>> for ExitCode {
    fn from(result: &fundsnap_common::Result<T>) -> Self {
        match result {
            Ok(_) => ExitCode::Success,
            Err(_) => ExitCode::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_two_codes() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(i32::from(ExitCode::Failure), 1);
        assert!(ExitCode::Success.is_success());
        assert!(!ExitCode::Failure.is_success());
    }

    #[test]
    fn every_error_maps_to_failure() {
        let errors = [
            fundsnap_common::Error::Config("x".into()),
            fundsnap_common::Error::Fetch("x".into()),
            fundsnap_common::Error::Merge("x".into()),
            fundsnap_common::Error::Format("x".into()),
        ];
        for err in errors {
            let result: fundsnap_common::Result<()> = Err(err);
            assert_eq!(ExitCode::from(&result), ExitCode::Failure);
        }
        assert_eq!(ExitCode::from(&Ok::<_, fundsnap_common::Error>(())), ExitCode::Success);
    }
}
