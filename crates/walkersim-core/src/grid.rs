//! Uniform spatial grid over the world rectangle.
//!
//! Cells are square, `CELL_SIZE` on a side, laid out row-major. Each cell
//! lists the agent indices currently inside it. Every agent lives in exactly
//! one cell; positions outside the rectangle clamp to the nearest edge cell.

use crate::math::Vec3;

/// Edge length of a grid cell in world units.
pub const CELL_SIZE: f32 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    mins: Vec3,
    maxs: Vec3,
    cell_size: f32,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<usize>>,
}

impl SpatialGrid {
    /// Empty grid covering `[mins, maxs)`.
    pub fn new(mins: Vec3, maxs: Vec3, cell_size: f32) -> Self {
        let (cols, rows) = Self::dimensions(mins, maxs, cell_size);
        Self {
            mins,
            maxs,
            cell_size,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        }
    }

    /// Grid restored from persisted cell lists. Returns `None` when the
    /// number of cells does not match the rectangle.
    pub fn from_cells(
        mins: Vec3,
        maxs: Vec3,
        cell_size: f32,
        cells: Vec<Vec<usize>>,
    ) -> Option<Self> {
        let (cols, rows) = Self::dimensions(mins, maxs, cell_size);
        if cells.len() != cols * rows {
            return None;
        }
        Some(Self {
            mins,
            maxs,
            cell_size,
            cols,
            rows,
            cells,
        })
    }

    /// Column and row count for a rectangle; never zero.
    pub fn dimensions(mins: Vec3, maxs: Vec3, cell_size: f32) -> (usize, usize) {
        let span = |lo: f32, hi: f32| {
            let cells = ((hi - lo) / cell_size).ceil();
            if cells.is_finite() && cells >= 1.0 {
                cells as usize
            } else {
                1
            }
        };
        (span(mins.x, maxs.x), span(mins.y, maxs.y))
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &[Vec<usize>] {
        &self.cells
    }

    pub fn cell(&self, cell: usize) -> &[usize] {
        self.cells.get(cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of entries across all cells.
    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }

    fn axis_coord(&self, value: f32, min: f32, count: usize) -> usize {
        let c = ((value - min) / self.cell_size).floor();
        if !c.is_finite() || c < 0.0 {
            0
        } else {
            (c as usize).min(count - 1)
        }
    }

    /// Column/row of the cell containing `pos`, clamped to the grid.
    pub fn cell_coords(&self, pos: Vec3) -> (usize, usize) {
        (
            self.axis_coord(pos.x, self.mins.x, self.cols),
            self.axis_coord(pos.y, self.mins.y, self.rows),
        )
    }

    /// 1D cell index of `pos`.
    pub fn cell_of(&self, pos: Vec3) -> usize {
        let (x, y) = self.cell_coords(pos);
        y * self.cols + x
    }

    /// Add `index` to the cell containing `pos`; returns that cell.
    pub fn insert(&mut self, index: usize, pos: Vec3) -> usize {
        let cell = self.cell_of(pos);
        self.cells[cell].push(index);
        cell
    }

    /// Remove `index` from `cell`. Returns false if it was not there.
    pub fn remove(&mut self, index: usize, cell: usize) -> bool {
        let Some(entries) = self.cells.get_mut(cell) else {
            return false;
        };
        match entries.iter().position(|&e| e == index) {
            Some(slot) => {
                entries.swap_remove(slot);
                true
            }
            None => false,
        }
    }

    /// Move `index` from `old_cell` to `new_cell`; no-op when unchanged.
    pub fn move_agent(&mut self, index: usize, old_cell: usize, new_cell: usize) {
        if old_cell == new_cell {
            return;
        }
        self.remove(index, old_cell);
        self.cells[new_cell].push(index);
    }

    /// Append every index in the cells overlapping `[min, max]` to `out`.
    pub fn query_rect(&self, min: Vec3, max: Vec3, out: &mut Vec<usize>) {
        let (x0, y0) = self.cell_coords(min);
        let (x1, y1) = self.cell_coords(max);
        for y in y0..=y1 {
            let row = y * self.cols;
            for x in x0..=x1 {
                out.extend_from_slice(&self.cells[row + x]);
            }
        }
    }

    /// Candidates within `radius` of `center`: every index in the cells
    /// overlapping the bounding square. Callers filter by exact distance.
    pub fn query_radius(&self, center: Vec3, radius: f32, out: &mut Vec<usize>) {
        let r = Vec3::xy(radius, radius);
        self.query_rect(center - r, center + r, out);
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SpatialGrid {
        SpatialGrid::new(Vec3::xy(-500.0, -500.0), Vec3::xy(500.0, 500.0), CELL_SIZE)
    }

    #[test]
    fn test_dimensions() {
        let g = grid();
        assert_eq!((g.cols(), g.rows()), (10, 10));
        assert_eq!(g.cell_count(), 100);

        let odd = SpatialGrid::new(Vec3::ZERO, Vec3::xy(250.0, 50.0), CELL_SIZE);
        assert_eq!((odd.cols(), odd.rows()), (3, 1));

        let degenerate = SpatialGrid::new(Vec3::ZERO, Vec3::ZERO, CELL_SIZE);
        assert_eq!(degenerate.cell_count(), 1);
    }

    #[test]
    fn test_cell_of_clamps() {
        let g = grid();
        assert_eq!(g.cell_of(Vec3::xy(-500.0, -500.0)), 0);
        assert_eq!(g.cell_of(Vec3::xy(-450.0, -350.0)), 10);
        assert_eq!(g.cell_of(Vec3::xy(499.0, 499.0)), 99);
        assert_eq!(g.cell_of(Vec3::xy(10_000.0, 10_000.0)), 99);
        assert_eq!(g.cell_of(Vec3::xy(-10_000.0, 0.0)), 50);
        assert_eq!(g.cell_of(Vec3::xy(f32::NAN, f32::NAN)), 0);
    }

    #[test]
    fn test_insert_remove_move() {
        let mut g = grid();
        let a = g.insert(0, Vec3::xy(0.0, 0.0));
        let b = g.insert(1, Vec3::xy(0.0, 0.0));
        assert_eq!(a, b);
        assert_eq!(g.len(), 2);

        let target = g.cell_of(Vec3::xy(300.0, 300.0));
        g.move_agent(0, a, target);
        assert_eq!(g.cell(a), &[1]);
        assert_eq!(g.cell(target), &[0]);

        g.move_agent(1, a, a);
        assert_eq!(g.cell(a), &[1]);

        assert!(g.remove(1, a));
        assert!(!g.remove(1, a));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_query_radius() {
        let mut g = grid();
        g.insert(0, Vec3::xy(0.0, 0.0));
        g.insert(1, Vec3::xy(40.0, 40.0));
        g.insert(2, Vec3::xy(400.0, 400.0));

        let mut out = Vec::new();
        g.query_radius(Vec3::xy(10.0, 10.0), 50.0, &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![0, 1]);

        out.clear();
        g.query_rect(Vec3::xy(-500.0, -500.0), Vec3::xy(500.0, 500.0), &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_from_cells_checks_shape() {
        let mins = Vec3::ZERO;
        let maxs = Vec3::xy(200.0, 200.0);
        assert!(SpatialGrid::from_cells(mins, maxs, CELL_SIZE, vec![Vec::new(); 4]).is_some());
        assert!(SpatialGrid::from_cells(mins, maxs, CELL_SIZE, vec![Vec::new(); 3]).is_none());
    }
}
