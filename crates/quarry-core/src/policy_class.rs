//! Per-class policy option block.

use crate::constants::*;
use crate::options::PolicyOption;
use crate::status::{HttpStatus, LibraryError};

/// Connection, pipelining and throttle configuration for one policy
/// class.  Owned by the policy engine; worker-thread only once the
/// service is running.
#[derive(Clone, Debug)]
pub struct PolicyClass {
    pub connection_limit: i64,
    pub per_host_connection_limit: i64,
    pub pipelining_depth: i64,
    pub throttle_rate: i64,
}

impl Default for PolicyClass {
    fn default() -> Self {
        PolicyClass {
            connection_limit: CONNECTION_LIMIT_DEFAULT,
            per_host_connection_limit: CONNECTION_LIMIT_DEFAULT,
            pipelining_depth: PIPELINING_DEFAULT,
            throttle_rate: THROTTLE_RATE_DEFAULT,
        }
    }
}

impl PolicyClass {
    pub fn set(&mut self, opt: PolicyOption, value: i64) -> Result<i64, HttpStatus> {
        match opt {
            PolicyOption::ConnectionLimit => {
                self.connection_limit =
                    value.clamp(CONNECTION_LIMIT_MIN, CONNECTION_LIMIT_MAX);
                Ok(self.connection_limit)
            }
            PolicyOption::PerHostConnectionLimit => {
                self.per_host_connection_limit =
                    value.clamp(CONNECTION_LIMIT_MIN, self.connection_limit);
                Ok(self.per_host_connection_limit)
            }
            PolicyOption::PipeliningDepth => {
                self.pipelining_depth = value.clamp(0, PIPELINING_MAX);
                Ok(self.pipelining_depth)
            }
            PolicyOption::ThrottleRate => {
                self.throttle_rate = value.clamp(0, THROTTLE_RATE_MAX);
                Ok(self.throttle_rate)
            }
            _ => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }

    pub fn get(&self, opt: PolicyOption) -> Result<i64, HttpStatus> {
        match opt {
            PolicyOption::ConnectionLimit => Ok(self.connection_limit),
            PolicyOption::PerHostConnectionLimit => Ok(self.per_host_connection_limit),
            PolicyOption::PipeliningDepth => Ok(self.pipelining_depth),
            PolicyOption::ThrottleRate => Ok(self.throttle_rate),
            _ => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }

    /// Whether requests in this class pipeline on their connections.
    pub fn is_pipelined(&self) -> bool {
        self.pipelining_depth > 1
    }

    /// In-flight admission limit.  Pipelined classes hand connection
    /// management to the transport, so the cap is per-host times depth;
    /// otherwise the class connection limit applies directly.
    pub fn active_limit(&self) -> i64 {
        if self.is_pipelined() {
            self.per_host_connection_limit * self.pipelining_depth
        } else {
            self.connection_limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps_to_limits() {
        let mut options = PolicyClass::default();
        assert_eq!(
            options.set(PolicyOption::ConnectionLimit, 100_000).unwrap(),
            CONNECTION_LIMIT_MAX
        );
        assert_eq!(options.set(PolicyOption::ConnectionLimit, 0).unwrap(), 1);

        // Per-host cap never exceeds the class connection limit.
        options.set(PolicyOption::ConnectionLimit, 8).unwrap();
        assert_eq!(
            options
                .set(PolicyOption::PerHostConnectionLimit, 32)
                .unwrap(),
            8
        );

        assert_eq!(
            options.set(PolicyOption::PipeliningDepth, 99).unwrap(),
            PIPELINING_MAX
        );
        assert_eq!(options.set(PolicyOption::ThrottleRate, -5).unwrap(), 0);
    }

    #[test]
    fn rejects_foreign_options() {
        let mut options = PolicyClass::default();
        assert!(options.set(PolicyOption::Trace, 1).is_err());
        assert!(options.get(PolicyOption::CaPath).is_err());
    }

    #[test]
    fn active_limit_switches_with_pipelining() {
        let mut options = PolicyClass::default();
        options.set(PolicyOption::ConnectionLimit, 16).unwrap();
        options.set(PolicyOption::PerHostConnectionLimit, 4).unwrap();
        assert!(!options.is_pipelined());
        assert_eq!(options.active_limit(), 16);

        options.set(PolicyOption::PipeliningDepth, 5).unwrap();
        assert!(options.is_pipelined());
        assert_eq!(options.active_limit(), 20);
    }
}
