// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Layout manager: grid placement, elevation and presentation parameters.
//!
//! Slots are numbered row-major from 0. A slot maps to a cell of
//! `viewport / {columns, rows}` pixels; slots past `columns × rows` continue
//! in extra rows below the viewport. Distinct slots never overlap.
//!
//! The manager knows nothing about process state except the attention
//! indicator set the orchestrator feeds it.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::config::ResolvedLayoutConfig;
use crate::session::{LayoutView, Placement, SessionId};

/// Fraction of the viewport an elevated session covers.
const OVERLAY_FRACTION: f64 = 0.8;
const RENDER_CELL_WIDTH: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("Session {0} is not in the layout")]
    UnknownSession(SessionId),

    #[error("Grid must be at least 1x1 (got {columns}x{rows})")]
    InvalidGrid { columns: u16, rows: u16 },

    #[error("Opacity {0} is outside 0.0..=1.0")]
    InvalidOpacity(f32),
}

/// Process-wide presentation state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub columns: u16,
    pub rows: u16,
    pub opacity: f32,
    pub theme: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl From<&ResolvedLayoutConfig> for Layout {
    fn from(config: &ResolvedLayoutConfig) -> Self {
        Self {
            columns: config.columns,
            rows: config.rows,
            opacity: config.opacity,
            theme: config.theme.clone(),
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
        }
    }
}

#[derive(Debug, Clone)]
struct Elevated {
    id: SessionId,
    /// Slot held before elevation, reused on de-elevation when still free.
    prior_slot: usize,
}

#[derive(Debug)]
pub struct LayoutManager {
    layout: Layout,
    /// Sessions in creation order.
    order: Vec<SessionId>,
    /// Grid slots of non-elevated sessions.
    slots: HashMap<SessionId, usize>,
    elevated: Option<Elevated>,
    opacity_overrides: HashMap<SessionId, f32>,
    attention: BTreeSet<SessionId>,
}

impl LayoutManager {
    pub fn new(layout: Layout) -> Result<Self, LayoutError> {
        validate_grid(layout.columns, layout.rows)?;
        validate_opacity(layout.opacity)?;
        Ok(Self {
            layout,
            order: Vec::new(),
            slots: HashMap::new(),
            elevated: None,
            opacity_overrides: HashMap::new(),
            attention: BTreeSet::new(),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.order.contains(id)
    }

    /// Place a new session in the lowest free slot.
    pub fn add(&mut self, id: SessionId) -> Placement {
        if let Some(slot) = self.slots.get(&id) {
            return self.cell(*slot);
        }
        let slot = self.lowest_free_slot();
        self.slots.insert(id.clone(), slot);
        self.order.push(id);
        self.cell(slot)
    }

    /// Forget a session. Other sessions keep their slots.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        let known = self.order.contains(id);
        self.order.retain(|other| other != id);
        self.slots.remove(id);
        if self.elevated.as_ref().is_some_and(|e| &e.id == id) {
            self.elevated = None;
        }
        self.opacity_overrides.remove(id);
        self.attention.remove(id);
        known
    }

    /// Elevate `id`, de-elevating any other session first.
    ///
    /// Returns the session that was de-elevated to make room, if any.
    pub fn elevate(&mut self, id: &SessionId) -> Result<Option<SessionId>, LayoutError> {
        if !self.contains(id) {
            return Err(LayoutError::UnknownSession(id.clone()));
        }
        if self.elevated.as_ref().is_some_and(|e| &e.id == id) {
            return Ok(None);
        }
        let previous = self.de_elevate();
        let prior_slot = match self.slots.remove(id) {
            Some(slot) => slot,
            None => self.lowest_free_slot(),
        };
        self.elevated = Some(Elevated {
            id: id.clone(),
            prior_slot,
        });
        self.attention.remove(id);
        Ok(previous)
    }

    /// Return the elevated session to the grid, preferring its old slot.
    pub fn de_elevate(&mut self) -> Option<SessionId> {
        let elevated = self.elevated.take()?;
        let slot = if self.slot_taken(elevated.prior_slot) {
            self.lowest_free_slot()
        } else {
            elevated.prior_slot
        };
        self.slots.insert(elevated.id.clone(), slot);
        Some(elevated.id)
    }

    pub fn elevated(&self) -> Option<&SessionId> {
        self.elevated.as_ref().map(|e| &e.id)
    }

    /// Change grid dimensions and reassign every slot in creation order.
    pub fn resize(&mut self, columns: u16, rows: u16) -> Result<(), LayoutError> {
        validate_grid(columns, rows)?;
        self.layout.columns = columns;
        self.layout.rows = rows;
        self.slots.clear();
        let elevated_id = self.elevated.as_ref().map(|e| e.id.clone());
        for (slot, id) in self.order.iter().enumerate() {
            if Some(id) == elevated_id.as_ref() {
                if let Some(elevated) = self.elevated.as_mut() {
                    elevated.prior_slot = slot;
                }
            } else {
                self.slots.insert(id.clone(), slot);
            }
        }
        Ok(())
    }

    pub fn set_opacity(&mut self, opacity: f32) -> Result<(), LayoutError> {
        validate_opacity(opacity)?;
        self.layout.opacity = opacity;
        Ok(())
    }

    /// Set or clear a per-session opacity override.
    pub fn set_session_opacity(
        &mut self,
        id: &SessionId,
        opacity: Option<f32>,
    ) -> Result<(), LayoutError> {
        if !self.contains(id) {
            return Err(LayoutError::UnknownSession(id.clone()));
        }
        match opacity {
            Some(value) => {
                validate_opacity(value)?;
                self.opacity_overrides.insert(id.clone(), value);
            }
            None => {
                self.opacity_overrides.remove(id);
            }
        }
        Ok(())
    }

    /// The opacity a session is drawn with.
    pub fn effective_opacity(&self, id: &SessionId) -> f32 {
        self.opacity_overrides
            .get(id)
            .copied()
            .unwrap_or(self.layout.opacity)
    }

    pub fn set_theme(&mut self, theme: impl Into<String>) {
        self.layout.theme = theme.into();
    }

    pub fn mark_attention(&mut self, id: &SessionId) {
        if self.contains(id) {
            self.attention.insert(id.clone());
        }
    }

    pub fn clear_attention(&mut self, id: &SessionId) {
        self.attention.remove(id);
    }

    pub fn attention(&self) -> impl Iterator<Item = &SessionId> {
        self.attention.iter()
    }

    pub fn needs_attention(&self, id: &SessionId) -> bool {
        self.attention.contains(id)
    }

    /// Current placement of a session: its grid cell, or the centered
    /// overlay when elevated.
    pub fn placement(&self, id: &SessionId) -> Option<Placement> {
        if self.elevated.as_ref().is_some_and(|e| &e.id == id) {
            return Some(self.overlay());
        }
        self.slots.get(id).map(|slot| self.cell(*slot))
    }

    pub fn slot(&self, id: &SessionId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Everything a snapshot needs about one session.
    pub fn view(&self, id: &SessionId) -> LayoutView {
        LayoutView {
            placement: self.placement(id),
            is_elevated: self.elevated.as_ref().is_some_and(|e| &e.id == id),
            opacity_override: self.opacity_overrides.get(id).copied(),
        }
    }

    /// Views for every session, keyed by id.
    pub fn views(&self) -> HashMap<SessionId, LayoutView> {
        self.order
            .iter()
            .map(|id| (id.clone(), self.view(id)))
            .collect()
    }

    /// Placements of all non-elevated sessions, in creation order.
    pub fn grid_placements(&self) -> Vec<(SessionId, Placement)> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id).map(|slot| (id.clone(), self.cell(*slot))))
            .collect()
    }

    /// Plain-text picture of the grid.
    ///
    /// Each cell shows the session label (or `-` when free); `!` marks a
    /// pending attention request. The elevated session is listed below.
    pub fn render(&self, labels: &HashMap<SessionId, String>) -> String {
        let columns = usize::from(self.layout.columns);
        let occupied = self.slots.values().map(|s| s + 1).max().unwrap_or(0);
        let grid_rows = usize::from(self.layout.rows).max(occupied.div_ceil(columns));

        let mut by_slot: HashMap<usize, &SessionId> = HashMap::new();
        for (id, slot) in &self.slots {
            by_slot.insert(*slot, id);
        }

        let border = format!(
            "+{}",
            format!("{}+", "-".repeat(RENDER_CELL_WIDTH)).repeat(columns)
        );
        let mut out = String::new();
        out.push_str(&border);
        out.push('\n');
        for row in 0..grid_rows {
            out.push('|');
            for col in 0..columns {
                let text = match by_slot.get(&(row * columns + col)) {
                    Some(id) => self.cell_label(id, labels),
                    None => "-".to_string(),
                };
                out.push_str(&format!(" {:<width$} |", text, width = RENDER_CELL_WIDTH - 2));
            }
            out.push('\n');
            out.push_str(&border);
            out.push('\n');
        }
        if let Some(elevated) = &self.elevated {
            out.push_str(&format!(
                "elevated: {}\n",
                self.cell_label(&elevated.id, labels)
            ));
        }
        out
    }

    fn cell_label(&self, id: &SessionId, labels: &HashMap<SessionId, String>) -> String {
        let base = labels
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.short().to_string());
        let marker = if self.attention.contains(id) { "!" } else { "" };
        let max = RENDER_CELL_WIDTH - 2 - marker.len();
        let mut label: String = base.chars().take(max).collect();
        label.push_str(marker);
        label
    }

    fn slot_taken(&self, slot: usize) -> bool {
        self.slots.values().any(|s| *s == slot)
    }

    fn lowest_free_slot(&self) -> usize {
        let mut taken: Vec<usize> = self.slots.values().copied().collect();
        if let Some(elevated) = &self.elevated {
            taken.push(elevated.prior_slot);
        }
        taken.sort_unstable();
        let mut candidate = 0;
        for slot in taken {
            if slot == candidate {
                candidate += 1;
            } else if slot > candidate {
                break;
            }
        }
        candidate
    }

    fn cell(&self, slot: usize) -> Placement {
        let columns = u32::from(self.layout.columns);
        let rows = u32::from(self.layout.rows);
        let width = (self.layout.viewport_width / columns).max(1);
        let height = (self.layout.viewport_height / rows).max(1);
        let slot = slot as u32;
        Placement {
            x: (slot % columns) * width,
            y: (slot / columns) * height,
            width,
            height,
        }
    }

    fn overlay(&self) -> Placement {
        let width = ((f64::from(self.layout.viewport_width) * OVERLAY_FRACTION) as u32).max(1);
        let height = ((f64::from(self.layout.viewport_height) * OVERLAY_FRACTION) as u32).max(1);
        Placement {
            x: (self.layout.viewport_width.saturating_sub(width)) / 2,
            y: (self.layout.viewport_height.saturating_sub(height)) / 2,
            width,
            height,
        }
    }
}

fn validate_grid(columns: u16, rows: u16) -> Result<(), LayoutError> {
    if columns == 0 || rows == 0 {
        return Err(LayoutError::InvalidGrid { columns, rows });
    }
    Ok(())
}

fn validate_opacity(opacity: f32) -> Result<(), LayoutError> {
    if !(0.0..=1.0).contains(&opacity) {
        return Err(LayoutError::InvalidOpacity(opacity));
    }
    Ok(())
}
