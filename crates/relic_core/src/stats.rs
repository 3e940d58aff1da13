//! Pipeline counters, reported in the end-of-run summary.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseStats {
    pub entries_scanned: u64,
    pub mft_records: u64,
    pub usn_records: u64,
    pub usn_rows: u64,
    pub logfile_pages: u64,
    pub corrupt_entries: u64,
    pub fixup_mismatches: u64,
    pub bad_run_lists: u64,
    pub attribute_list_cycles: u64,
    pub usn_corrupt: u64,
    pub sparse_bytes_skipped: u64,
    pub path_cycles: u64,
    pub stale_parents: u64,
}

impl ParseStats {
    pub fn merge(&mut self, other: &ParseStats) {
        self.entries_scanned += other.entries_scanned;
        self.mft_records += other.mft_records;
        self.usn_records += other.usn_records;
        self.usn_rows += other.usn_rows;
        self.logfile_pages += other.logfile_pages;
        self.corrupt_entries += other.corrupt_entries;
        self.fixup_mismatches += other.fixup_mismatches;
        self.bad_run_lists += other.bad_run_lists;
        self.attribute_list_cycles += other.attribute_list_cycles;
        self.usn_corrupt += other.usn_corrupt;
        self.sparse_bytes_skipped += other.sparse_bytes_skipped;
        self.path_cycles += other.path_cycles;
        self.stale_parents += other.stale_parents;
    }

    /// True when any record-scope recovery happened; the process exits
    /// with the partial-result code in that case.
    pub fn has_corruption(&self) -> bool {
        self.corrupt_entries > 0
            || self.fixup_mismatches > 0
            || self.bad_run_lists > 0
            || self.attribute_list_cycles > 0
            || self.usn_corrupt > 0
            || self.path_cycles > 0
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("MFT entries scanned:   {}", self.entries_scanned),
            format!("MFT records emitted:   {}", self.mft_records),
            format!("USN records decoded:   {}", self.usn_records),
            format!("USN rows emitted:      {}", self.usn_rows),
            format!("$LogFile pages walked: {}", self.logfile_pages),
        ];
        let anomalies: &[(&str, u64)] = &[
            ("corrupt entries", self.corrupt_entries),
            ("fixup mismatches", self.fixup_mismatches),
            ("bad run lists", self.bad_run_lists),
            ("attribute list cycles", self.attribute_list_cycles),
            ("corrupt USN records", self.usn_corrupt),
            ("path cycles", self.path_cycles),
            ("stale parents", self.stale_parents),
        ];
        for (label, count) in anomalies {
            if *count > 0 {
                lines.push(format!("{label}: {count}"));
            }
        }
        if self.sparse_bytes_skipped > 0 {
            lines.push(format!(
                "sparse bytes skipped:  {}",
                self.sparse_bytes_skipped
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates() {
        let mut a = ParseStats {
            mft_records: 2,
            usn_corrupt: 1,
            ..Default::default()
        };
        let b = ParseStats {
            mft_records: 3,
            sparse_bytes_skipped: 4096,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.mft_records, 5);
        assert_eq!(a.sparse_bytes_skipped, 4096);
        assert!(a.has_corruption());
    }

    #[test]
    fn clean_run_reports_no_corruption() {
        let stats = ParseStats {
            mft_records: 10,
            stale_parents: 1,
            ..Default::default()
        };
        // Stale parents are anomalies but not corruption.
        assert!(!stats.has_corruption());
        assert!(stats.summary().contains("stale parents: 1"));
    }
}
