//! CSV data provider: serves one row per loop iteration to each VU
//! that references a source.
//!
//! `all_threads` sources share one mutex-protected cursor across the
//! whole run; `per_thread` sources give every VU an independent cursor
//! starting at row 0. At end of data a recycling cursor wraps to row 0;
//! a non-recycling cursor sticks on the last row and logs a
//! `CsvExhausted` warning once.

use crate::plan::{CsvSource, Plan, SharingMode, ThreadGroup};
use crate::vars;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct Cursor {
    next: usize,
    warned: bool,
}

impl Cursor {
    /// Picks the row index for this draw and advances.
    fn draw(&mut self, rows: usize, recycle: bool, source: &str) -> Option<usize> {
        if rows == 0 {
            return None;
        }
        if self.next >= rows {
            if recycle {
                self.next = 0;
            } else {
                if !self.warned {
                    self.warned = true;
                    tracing::warn!(source, "CsvExhausted: reusing last row");
                }
                return Some(rows - 1);
            }
        }
        let row = self.next;
        self.next += 1;
        Some(row)
    }
}

struct SourceRuntime {
    source: CsvSource,
    shared_cursor: Mutex<Cursor>,
}

/// Run-scoped bank of CSV sources, shared by every scheduler.
pub struct CsvBank {
    sources: Vec<SourceRuntime>,
}

impl CsvBank {
    pub fn new(plan: &Plan) -> Arc<Self> {
        Arc::new(Self {
            sources: plan
                .csv_sources
                .iter()
                .map(|s| SourceRuntime {
                    source: s.clone(),
                    shared_cursor: Mutex::new(Cursor::default()),
                })
                .collect(),
        })
    }

    /// Indexes of the sources a thread-group references: any `${name}`
    /// in its enabled requests' templates naming one of the source's
    /// columns.
    pub fn referenced_by(&self, group: &ThreadGroup) -> Vec<usize> {
        let mut names: Vec<&str> = Vec::new();
        for request in group.requests.iter().filter(|r| r.enabled) {
            for template in request.template_strings() {
                names.extend(vars::placeholder_names(template));
            }
        }
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, rt)| {
                rt.source
                    .columns
                    .iter()
                    .any(|col| names.iter().any(|n| n == col))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Fresh per-VU cursors, one slot per source (used only for
    /// `per_thread` sources).
    pub fn vu_cursors(&self) -> Vec<Cursor> {
        self.sources.iter().map(|_| Cursor::default()).collect()
    }

    /// Draws one row from each referenced source and returns the
    /// column→cell bindings for the iteration.
    pub fn draw_bindings(
        &self,
        referenced: &[usize],
        vu_cursors: &mut [Cursor],
    ) -> HashMap<String, String> {
        let mut bindings = HashMap::new();
        for &idx in referenced {
            let rt = &self.sources[idx];
            let rows = rt.source.rows.len();
            let row_idx = match rt.source.sharing_mode {
                SharingMode::AllThreads => {
                    let mut cursor = rt.shared_cursor.lock().unwrap();
                    cursor.draw(rows, rt.source.recycle, &rt.source.name)
                }
                SharingMode::PerThread => {
                    vu_cursors[idx].draw(rows, rt.source.recycle, &rt.source.name)
                }
            };
            if let Some(row_idx) = row_idx {
                let row = &rt.source.rows[row_idx];
                for (col, cell) in rt.source.columns.iter().zip(row.iter()) {
                    bindings.insert(col.clone(), cell.clone());
                }
            }
        }
        bindings
    }
}
