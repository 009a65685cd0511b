//! Grid layout computation
//!
//! Maps enabled sources onto a fixed `cols x rows` grid. Explicit rectangles
//! are used verbatim, everything else gets an equal-sized grid cell. When
//! there are more sources than cells the excess is either hidden or handed to
//! a [`RotationSchedule`].

use shared::{DisplaySettings, Rect, SourceDescriptor};
use tracing::warn;

use crate::core::rotation::RotationSchedule;
use crate::error::{DisplayError, DisplayResult};
use crate::types::{Placement, PlacementTable};

/// Result of one layout pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    pub table: PlacementTable,
    /// Enabled sources that never get a slot
    pub hidden: Vec<String>,
    pub rotation: Option<RotationSchedule>,
    pub capacity: usize,
}

impl LayoutPlan {
    /// Overflow report for hidden sources. Not fatal.
    pub fn overflow(&self) -> Option<DisplayError> {
        if self.hidden.is_empty() {
            return None;
        }
        Some(DisplayError::PlacementOverflow {
            capacity: self.capacity,
            hidden_count: self.hidden.len(),
            hidden: self.hidden.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEngine {
    screen_width: u32,
    screen_height: u32,
    cols: u32,
    rows: u32,
    rotation_enabled: bool,
}

impl LayoutEngine {
    pub fn new(screen_width: u32, screen_height: u32, cols: u32, rows: u32, rotation_enabled: bool) -> Self {
        Self {
            screen_width,
            screen_height,
            cols,
            rows,
            rotation_enabled,
        }
    }

    pub fn from_settings(settings: &DisplaySettings) -> Self {
        Self::new(
            settings.screen_width,
            settings.screen_height,
            settings.grid_cols,
            settings.grid_rows,
            settings.enable_rotation,
        )
    }

    pub fn capacity(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Cell rectangle for `slot`, row-major from the top-left
    pub fn cell_rect(&self, slot: usize) -> Rect {
        let cell_width = self.screen_width / self.cols;
        let cell_height = self.screen_height / self.rows;
        let col = (slot % self.cols as usize) as u32;
        let row = (slot / self.cols as usize) as u32;
        Rect::new(col * cell_width, row * cell_height, cell_width, cell_height)
    }

    pub fn compute_placements(&self, sources: &[SourceDescriptor]) -> DisplayResult<LayoutPlan> {
        self.check_grid()?;

        let capacity = self.capacity();
        let enabled: Vec<&SourceDescriptor> = sources.iter().filter(|s| s.enabled).collect();
        let split = enabled.len().min(capacity);
        let (visible, excess) = enabled.split_at(split);

        for source in visible {
            if let Some(rect) = source.placement {
                if !rect.fits_within(self.screen_width, self.screen_height) {
                    return Err(DisplayError::config(
                        format!("cameras[{}].placement", source.name),
                        format!(
                            "{} lies outside the {}x{} screen",
                            rect, self.screen_width, self.screen_height
                        ),
                    ));
                }
            }
        }

        let slots = self.assign_slots(visible);

        let mut placements = Vec::with_capacity(visible.len());
        let mut grid_slots = Vec::new();
        let mut unplaced = Vec::new();
        for (source, slot) in visible.iter().zip(slots) {
            let Some(slot) = slot else {
                warn!(camera = %source.name, "No grid cell left clear of explicit placements");
                unplaced.push(source.name.clone());
                continue;
            };
            let rect = match source.placement {
                Some(rect) => rect,
                None => {
                    grid_slots.push(slot);
                    self.cell_rect(slot)
                }
            };
            placements.push(Placement {
                source: source.name.clone(),
                rect,
                slot,
            });
        }

        check_overlaps(&placements)?;

        let mut excess_names = unplaced;
        excess_names.extend(excess.iter().map(|s| s.name.clone()));
        let mut hidden = Vec::new();
        let mut rotation = None;

        if !excess_names.is_empty() {
            grid_slots.sort_unstable();
            let rotating = excess_names.len().min(grid_slots.len());

            if self.rotation_enabled && rotating > 0 {
                let rotating_slots = grid_slots.split_off(grid_slots.len() - rotating);
                let mut pool: Vec<String> = rotating_slots
                    .iter()
                    .filter_map(|slot| placements.iter().find(|p| p.slot == *slot))
                    .map(|p| p.source.clone())
                    .collect();
                pool.extend(excess_names);
                rotation = Some(RotationSchedule::new(rotating_slots, pool));
            } else {
                if self.rotation_enabled {
                    warn!("Rotation enabled but every visible source has an explicit placement");
                }
                hidden = excess_names;
            }
        }

        Ok(LayoutPlan {
            table: PlacementTable::new(placements),
            hidden,
            rotation,
            capacity,
        })
    }

    fn check_grid(&self) -> DisplayResult<()> {
        if self.cols == 0 || self.rows == 0 {
            return Err(DisplayError::config("display.grid", "grid dimensions must be positive"));
        }
        if self.screen_width / self.cols == 0 || self.screen_height / self.rows == 0 {
            return Err(DisplayError::config(
                "display.grid",
                format!(
                    "{}x{} grid does not fit a {}x{} screen",
                    self.cols, self.rows, self.screen_width, self.screen_height
                ),
            ));
        }
        Ok(())
    }

    /// Slot ids for the visible sources, `None` when a grid source finds no clear cell
    ///
    /// Grid sources only ever take cells that no explicit rectangle covers:
    /// valid requested slots first, then the lowest clear cell in declared
    /// order. An explicit source takes the id of a cell it covers, falling back
    /// to any other covered or unused id so relay ports stay unique.
    fn assign_slots(&self, visible: &[&SourceDescriptor]) -> Vec<Option<usize>> {
        let capacity = self.capacity();
        let explicit: Vec<Rect> = visible.iter().filter_map(|s| s.placement).collect();
        let blocked: Vec<bool> = (0..capacity)
            .map(|slot| {
                let cell = self.cell_rect(slot);
                explicit.iter().any(|rect| rect.overlaps(&cell))
            })
            .collect();
        let mut taken = vec![false; capacity];
        let mut assigned: Vec<Option<usize>> = vec![None; visible.len()];

        for (index, source) in visible.iter().enumerate() {
            let Some(requested) = source.slot else { continue };
            if source.placement.is_some() {
                continue;
            }
            if requested < capacity && !taken[requested] && !blocked[requested] {
                taken[requested] = true;
                assigned[index] = Some(requested);
            } else {
                warn!(
                    camera = %source.name,
                    requested,
                    "Requested slot unavailable, assigning the next free slot"
                );
            }
        }

        for (index, source) in visible.iter().enumerate() {
            let Some(rect) = source.placement else { continue };
            let covered = (0..capacity).find(|&slot| !taken[slot] && rect.overlaps(&self.cell_rect(slot)));
            let slot = covered
                .or_else(|| (0..capacity).find(|&slot| !taken[slot] && blocked[slot]))
                .or_else(|| (0..capacity).find(|&slot| !taken[slot]));
            if let Some(slot) = slot {
                taken[slot] = true;
                assigned[index] = Some(slot);
            }
        }

        for (index, source) in visible.iter().enumerate() {
            if source.placement.is_some() || assigned[index].is_some() {
                continue;
            }
            if let Some(slot) = (0..capacity).find(|&slot| !taken[slot] && !blocked[slot]) {
                taken[slot] = true;
                assigned[index] = Some(slot);
            }
        }

        assigned
    }
}

fn check_overlaps(placements: &[Placement]) -> DisplayResult<()> {
    for (i, a) in placements.iter().enumerate() {
        for b in &placements[i + 1..] {
            if a.rect.overlaps(&b.rect) {
                return Err(DisplayError::config(
                    "cameras.placement",
                    format!("'{}' ({}) overlaps '{}' ({})", a.source, a.rect, b.source, b.rect),
                ));
            }
        }
    }
    Ok(())
}
