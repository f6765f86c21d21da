use crate::error::Result;
use crate::os::{
    detect::NetworkFacts,
    firewall::{Backup, RulePlan},
};
use crate::utils::tools::sha1sum_vec;
use log::info;
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

/// Plain text record of one applied run.
pub struct Report<'a> {
    pub stamp: &'a str,
    pub facts: &'a NetworkFacts,
    pub plan: &'a RulePlan,
    pub backup: &'a Backup,
    pub listing: &'a str,
}

impl<'a> Report<'a> {
    pub fn fingerprint(&self) -> String {
        sha1sum_vec(self.listing.as_bytes())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "ufwoxide report {}", self.stamp);
        let _ = writeln!(out);
        let _ = writeln!(out, "== Detected network");
        let _ = writeln!(out, "{}", self.facts);
        let _ = writeln!(out);
        let _ = writeln!(out, "== Applied commands ({})", self.plan.len());
        let _ = write!(out, "{}", self.plan);
        let _ = writeln!(out);
        let _ = writeln!(out, "== Backup");
        let _ = writeln!(out, "{}", self.backup.dir.display());
        let _ = writeln!(out);
        let _ = writeln!(out, "== Rule listing (sha1 {})", self.fingerprint());
        let _ = write!(out, "{}", self.listing);
        out
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("ufwoxide_report_{}.txt", self.stamp));
        fs::write(&path, self.render())?;
        info!("Report written to {}", path.display());
        Ok(path)
    }
}
