//! Settings validation

use super::schema::Settings;
use crate::error::SettingsError;
use std::net::IpAddr;

pub struct SettingsValidator;

impl SettingsValidator {
    /// Validate the entire settings document
    pub fn validate(settings: &Settings) -> Result<(), SettingsError> {
        Self::validate_prefixes(settings)?;
        Self::validate_targets(settings)?;
        Self::validate_hosts(settings)?;
        Self::validate_timeouts(settings)?;
        Ok(())
    }

    /// Rule prefixes must be present and must not shadow each other
    fn validate_prefixes(settings: &Settings) -> Result<(), SettingsError> {
        let block = &settings.firewall.block_prefix;
        let monitor = &settings.firewall.monitor_prefix;

        for prefix in [block, monitor] {
            if prefix.trim().is_empty() || prefix.contains('"') {
                return Err(SettingsError::InvalidPrefix(prefix.clone()));
            }
        }

        let (b, m) = (block.to_lowercase(), monitor.to_lowercase());
        if b.starts_with(&m) || m.starts_with(&b) {
            return Err(SettingsError::InvalidPrefix(format!(
                "{} overlaps {}",
                block, monitor
            )));
        }

        Ok(())
    }

    fn validate_targets(settings: &Settings) -> Result<(), SettingsError> {
        for target in &settings.firewall.targets {
            if target.is_empty() || target.contains(['/', '\\']) {
                return Err(SettingsError::InvalidPattern(target.clone()));
            }
        }

        if let Some(pattern) = &settings.firewall.wildcard {
            if !pattern.contains(['*', '?']) || pattern.contains(['/', '\\']) {
                return Err(SettingsError::InvalidPattern(pattern.clone()));
            }
        }

        Ok(())
    }

    fn validate_hosts(settings: &Settings) -> Result<(), SettingsError> {
        let hosts = &settings.hosts;

        for marker in [&hosts.marker_start, &hosts.marker_end] {
            if !marker.trim_start().starts_with('#') || marker.trim() == "#" {
                return Err(SettingsError::InvalidMarker(marker.clone()));
            }
        }

        if hosts.marker_start.trim() == hosts.marker_end.trim() {
            return Err(SettingsError::InvalidMarker(format!(
                "start and end markers are identical: {}",
                hosts.marker_start
            )));
        }

        if hosts.sinkhole.parse::<IpAddr>().is_err() {
            return Err(SettingsError::InvalidSinkhole(hosts.sinkhole.clone()));
        }

        for domain in &hosts.domains {
            if domain.is_empty() || domain.contains(char::is_whitespace) || domain.starts_with('#') {
                return Err(SettingsError::InvalidDomain(domain.clone()));
            }
        }

        Ok(())
    }

    fn validate_timeouts(settings: &Settings) -> Result<(), SettingsError> {
        if settings.store.debounce_ms == 0 {
            return Err(SettingsError::InvalidTimeout("store.debounce_ms"));
        }
        if settings.store.watch_interval_ms == 0 {
            return Err(SettingsError::InvalidTimeout("store.watch_interval_ms"));
        }
        if settings.firewall.command_timeout_ms == 0 {
            return Err(SettingsError::InvalidTimeout("firewall.command_timeout_ms"));
        }
        if settings.hosts.dns_flush_timeout_ms == 0 {
            return Err(SettingsError::InvalidTimeout("hosts.dns_flush_timeout_ms"));
        }
        if settings.monitor.poll_interval_ms == 0 {
            return Err(SettingsError::InvalidTimeout("monitor.poll_interval_ms"));
        }
        Ok(())
    }
}
