//! Hosts Blocklist Manager
//!
//! Owns one marker-delimited section of the hosts file holding a sinkhole
//! entry per configured domain. Lines outside the section are never touched.

pub mod dns;
pub mod section;

pub use dns::DnsFlusher;
pub use section::{HostsDocument, Markers, SectionState};

use crate::error::{FenceError, Result};
use crate::settings::HostsSettings;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainStatus {
    pub count: usize,
    pub domains: Vec<String>,
}

pub struct HostsBlocklist {
    path: PathBuf,
    settings: HostsSettings,
    flusher: DnsFlusher,
    guard: Mutex<()>,
}

impl HostsBlocklist {
    pub fn new(settings: HostsSettings) -> Self {
        let flusher = DnsFlusher::new(settings.dns_flush_command(), settings.dns_flush_timeout());
        Self::with_flusher(settings, flusher)
    }

    pub fn with_flusher(settings: HostsSettings, flusher: DnsFlusher) -> Self {
        Self {
            path: settings.hosts_path(),
            settings,
            flusher,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn markers(&self) -> Markers<'_> {
        Markers {
            start: &self.settings.marker_start,
            end: &self.settings.marker_end,
        }
    }

    /// Domains the section is expected to hold, in configured order
    pub fn target_domains(&self) -> Vec<String> {
        self.settings.domains.iter().cloned().collect()
    }

    fn entries(&self) -> Vec<String> {
        self.settings
            .domains
            .iter()
            .map(|domain| format!("{}\t{}", self.settings.sinkhole, domain))
            .collect()
    }

    /// A line this system would have written: sinkhole address then a configured domain
    fn is_owned_entry(&self, line: &str) -> bool {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(addr), Some(domain), None) => {
                addr == self.settings.sinkhole && self.settings.domains.contains(domain)
            }
            _ => false,
        }
    }

    fn read(&self) -> Result<HostsDocument> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(HostsDocument::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HostsDocument::parse("")),
            Err(e) => Err(FenceError::read(&self.path, e)),
        }
    }

    fn write(&self, doc: &HostsDocument) -> Result<()> {
        fs::write(&self.path, doc.render()).map_err(|e| FenceError::write(&self.path, e))
    }

    /// Ensure exactly one block section is present
    ///
    /// Returns `false` when the section was already in place.
    pub fn add_blocks(&self) -> Result<bool> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.read()?;

        match doc.state(self.markers()) {
            SectionState::Complete => {
                tracing::info!("Domain blocks already present in {:?}", self.path);
                return Ok(false);
            }
            SectionState::Damaged => {
                doc.remove_sections(self.markers(), |line| self.is_owned_entry(line));
            }
            SectionState::Absent => {}
        }

        doc.append_section(self.markers(), &self.entries());
        self.write(&doc)?;
        tracing::info!(
            "Added {} domain blocks to {:?}",
            self.settings.domains.len(),
            self.path
        );

        self.flusher.flush();
        Ok(true)
    }

    /// Remove the block section, repairing a damaged one
    ///
    /// Returns `false` when there was nothing to remove.
    pub fn remove_blocks(&self) -> Result<bool> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.read()?;

        if doc.state(self.markers()) == SectionState::Absent {
            tracing::info!("No domain blocks to remove from {:?}", self.path);
            return Ok(false);
        }

        doc.remove_sections(self.markers(), |line| self.is_owned_entry(line));
        self.write(&doc)?;
        tracing::info!("Removed domain blocks from {:?}", self.path);

        self.flusher.flush();
        Ok(true)
    }

    /// Both markers are present
    pub fn has_active_blocks(&self) -> Result<bool> {
        Ok(self.read()?.has_markers(self.markers()))
    }

    pub fn get_status(&self) -> Result<DomainStatus> {
        let doc = self.read()?;
        if !doc.has_markers(self.markers()) {
            return Ok(DomainStatus::default());
        }
        let domains = doc.section_hosts(self.markers());
        Ok(DomainStatus {
            count: domains.len(),
            domains,
        })
    }
}
