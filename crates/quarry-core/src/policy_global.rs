//! Global (cross-class) policy option block.

use log::debug;

use crate::constants::*;
use crate::handler::PolicyCallback;
use crate::options::PolicyOption;
use crate::status::{HttpStatus, LibraryError};

/// Options applying to the service as a whole: aggregate connection
/// ceiling, TLS certificate locations, proxy selection, trace level and
/// the optional SSL verification callback.
#[derive(Clone, Default)]
pub struct PolicyGlobal {
    pub connection_limit: i64,
    pub ca_path: String,
    pub ca_file: String,
    pub http_proxy: String,
    pub trace: i64,
    pub use_external_proxy: i64,
    pub ssl_ctx_callback: Option<PolicyCallback>,
}

impl PolicyGlobal {
    pub fn new() -> PolicyGlobal {
        PolicyGlobal {
            connection_limit: CONNECTION_LIMIT_DEFAULT,
            trace: TRACE_OFF,
            ..PolicyGlobal::default()
        }
    }

    pub fn set_long(&mut self, opt: PolicyOption, value: i64) -> Result<i64, HttpStatus> {
        match opt {
            PolicyOption::ConnectionLimit => {
                self.connection_limit =
                    value.clamp(CONNECTION_LIMIT_MIN, CONNECTION_LIMIT_MAX);
                Ok(self.connection_limit)
            }
            PolicyOption::Trace => {
                self.trace = value.clamp(TRACE_MIN, TRACE_MAX);
                Ok(self.trace)
            }
            PolicyOption::UseExternalProxy => {
                self.use_external_proxy = value.clamp(0, 1);
                Ok(self.use_external_proxy)
            }
            _ => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }

    pub fn set_string(&mut self, opt: PolicyOption, value: &str) -> Result<String, HttpStatus> {
        match opt {
            PolicyOption::CaPath => {
                debug!("setting global CA path to {}", value);
                self.ca_path = value.to_string();
                Ok(self.ca_path.clone())
            }
            PolicyOption::CaFile => {
                debug!("setting global CA file to {}", value);
                self.ca_file = value.to_string();
                Ok(self.ca_file.clone())
            }
            PolicyOption::HttpProxy => {
                debug!("setting global proxy to {}", value);
                self.http_proxy = value.to_string();
                Ok(self.http_proxy.clone())
            }
            _ => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }

    pub fn set_callback(
        &mut self,
        opt: PolicyOption,
        value: PolicyCallback,
    ) -> Result<(), HttpStatus> {
        match opt {
            PolicyOption::SslVerifyCallback => {
                self.ssl_ctx_callback = Some(value);
                Ok(())
            }
            _ => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }

    pub fn get_long(&self, opt: PolicyOption) -> Result<i64, HttpStatus> {
        match opt {
            PolicyOption::ConnectionLimit => Ok(self.connection_limit),
            PolicyOption::Trace => Ok(self.trace),
            PolicyOption::UseExternalProxy => Ok(self.use_external_proxy),
            _ => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }

    pub fn get_string(&self, opt: PolicyOption) -> Result<String, HttpStatus> {
        match opt {
            PolicyOption::CaPath => Ok(self.ca_path.clone()),
            PolicyOption::CaFile => Ok(self.ca_file.clone()),
            PolicyOption::HttpProxy => Ok(self.http_proxy.clone()),
            _ => Err(HttpStatus::library(LibraryError::InvalidArg)),
        }
    }
}
