//! Three-axis factor × datetime × id result of a table read.

use chrono::NaiveDateTime;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};

use crate::catalog::FactorType;
use crate::driver::Value;
use crate::error::Result;

/// Name of the timestamp column in every per-factor frame.
pub const DATETIME_COL: &str = "datetime";

/// How gaps are filled when the datetime axis is conformed to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMethod {
    /// Carry the last observation forward.
    Pad,
    /// Carry the next observation backward.
    Backfill,
}

/// Factor panel returned by [`FactorTable::read_data`](crate::tables::FactorTable::read_data).
///
/// Each factor is one `DataFrame` with a [`DATETIME_COL`] column followed by
/// one column per id, in [`Panel::ids`] order. `double` factors hold
/// `Float64` columns, `string` factors `String` columns; missing cells are null.
#[derive(Debug, Clone)]
pub struct Panel {
    factors: Vec<String>,
    types: Vec<FactorType>,
    datetimes: Vec<NaiveDateTime>,
    ids: Vec<String>,
    frames: Vec<DataFrame>,
}

impl Panel {
    pub fn factor_names(&self) -> &[String] {
        &self.factors
    }

    pub fn datetimes(&self) -> &[NaiveDateTime] {
        &self.datetimes
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// (factors, datetimes, ids)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.factors.len(), self.datetimes.len(), self.ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty() || self.datetimes.is_empty() || self.ids.is_empty()
    }

    fn factor_index(&self, factor: &str) -> Option<usize> {
        self.factors.iter().position(|f| f == factor)
    }

    pub fn factor_type(&self, factor: &str) -> Option<FactorType> {
        self.factor_index(factor).map(|i| self.types[i])
    }

    pub fn frame(&self, factor: &str) -> Option<&DataFrame> {
        self.factor_index(factor).map(|i| &self.frames[i])
    }

    pub fn frames(&self) -> impl Iterator<Item = (&str, &DataFrame)> {
        self.factors.iter().map(String::as_str).zip(self.frames.iter())
    }

    fn row(&self, dt: NaiveDateTime) -> Option<usize> {
        self.datetimes.iter().position(|d| *d == dt)
    }

    /// Numeric cell, `None` when null or absent.
    pub fn value_f64(&self, factor: &str, dt: NaiveDateTime, id: &str) -> Option<f64> {
        let row = self.row(dt)?;
        self.frame(factor)?.column(id).ok()?.f64().ok()?.get(row)
    }

    /// Text cell, `None` when null or absent.
    pub fn value_str(&self, factor: &str, dt: NaiveDateTime, id: &str) -> Option<String> {
        let row = self.row(dt)?;
        self.frame(factor)?
            .column(id)
            .ok()?
            .str()
            .ok()?
            .get(row)
            .map(ToString::to_string)
    }
}

/// Dense working buffer indexed `[factor][datetime][id]`, shaped by the
/// readers before it is frozen into a [`Panel`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Cube {
    pub factors: Vec<String>,
    pub datetimes: Vec<NaiveDateTime>,
    pub ids: Vec<String>,
    data: Vec<Vec<Vec<Value>>>,
}

impl Cube {
    /// `datetimes` must be sorted and unique.
    pub fn filled(
        factors: Vec<String>,
        datetimes: Vec<NaiveDateTime>,
        ids: Vec<String>,
        fill: &Value,
    ) -> Self {
        let data = vec![vec![vec![fill.clone(); ids.len()]; datetimes.len()]; factors.len()];
        Self {
            factors,
            datetimes,
            ids,
            data,
        }
    }

    pub fn set(&mut self, factor: usize, dt: usize, id: usize, value: Value) {
        self.data[factor][dt][id] = value;
    }

    #[cfg(test)]
    pub fn get(&self, factor: usize, dt: usize, id: usize) -> &Value {
        &self.data[factor][dt][id]
    }

    /// Select `ids` (first occurrence wins on duplicates); ids not present
    /// get `fill`.
    pub fn reindex_ids(self, ids: &[String], fill: &Value) -> Self {
        let position: HashMap<&str, usize> = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut seen = BTreeSet::new();
        let targets: Vec<(String, Option<usize>)> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| (id.clone(), position.get(id.as_str()).copied()))
            .collect();

        let data = self
            .data
            .iter()
            .map(|factor| {
                factor
                    .iter()
                    .map(|row| {
                        targets
                            .iter()
                            .map(|(_, src)| src.map_or_else(|| fill.clone(), |i| row[i].clone()))
                            .collect()
                    })
                    .collect()
            })
            .collect();

        Self {
            factors: self.factors,
            datetimes: self.datetimes,
            ids: targets.into_iter().map(|(id, _)| id).collect(),
            data,
        }
    }

    /// Conform the datetime axis to `target`.
    ///
    /// With a fill method, the union of the current and target axes is filled
    /// along time (nulls included) before the target rows are selected;
    /// without one, target rows missing from the current axis are null.
    pub fn conform_datetimes(self, target: &[NaiveDateTime], method: Option<FillMethod>) -> Self {
        let axis: Vec<NaiveDateTime> = match method {
            Some(_) => self
                .datetimes
                .iter()
                .chain(target)
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            None => self.datetimes.clone(),
        };
        let position: HashMap<NaiveDateTime, usize> = self
            .datetimes
            .iter()
            .enumerate()
            .map(|(i, dt)| (*dt, i))
            .collect();
        let n_ids = self.ids.len();

        let data = self
            .data
            .iter()
            .map(|factor| {
                let mut expanded: Vec<Vec<Value>> = axis
                    .iter()
                    .map(|dt| {
                        position
                            .get(dt)
                            .map_or_else(|| vec![Value::Null; n_ids], |&i| factor[i].clone())
                    })
                    .collect();
                match method {
                    Some(FillMethod::Pad) => fill_along_time(&mut expanded, 0..axis.len()),
                    Some(FillMethod::Backfill) => {
                        fill_along_time(&mut expanded, (0..axis.len()).rev());
                    }
                    None => {}
                }
                let expanded_pos: HashMap<NaiveDateTime, usize> =
                    axis.iter().enumerate().map(|(i, dt)| (*dt, i)).collect();
                target
                    .iter()
                    .map(|dt| {
                        expanded_pos
                            .get(dt)
                            .map_or_else(|| vec![Value::Null; n_ids], |&i| expanded[i].clone())
                    })
                    .collect()
            })
            .collect();

        Self {
            factors: self.factors,
            datetimes: target.to_vec(),
            ids: self.ids,
            data,
        }
    }

    pub fn fill_nulls(&mut self, fill: &Value) {
        for cell in self.data.iter_mut().flatten().flatten() {
            if cell.is_null() {
                *cell = fill.clone();
            }
        }
    }

    pub fn into_panel(self, types: Vec<FactorType>) -> Result<Panel> {
        let height = self.datetimes.len();
        let mut frames = Vec::with_capacity(self.factors.len());
        for (factor, kind) in self.data.iter().zip(&types) {
            let mut columns = Vec::with_capacity(self.ids.len() + 1);
            columns.push(Column::new(DATETIME_COL.into(), self.datetimes.clone()));
            for (j, id) in self.ids.iter().enumerate() {
                let column = match kind {
                    FactorType::Double => {
                        let values: Vec<Option<f64>> = factor.iter().map(|row| row[j].as_f64()).collect();
                        Column::new(id.as_str().into(), values)
                    }
                    FactorType::String => {
                        let values: Vec<Option<String>> = factor
                            .iter()
                            .map(|row| row[j].as_text().map(|s| s.into_owned()))
                            .collect();
                        Column::new(id.as_str().into(), values)
                    }
                };
                columns.push(column);
            }
            frames.push(DataFrame::new(height, columns)?);
        }

        Ok(Panel {
            factors: self.factors,
            types,
            datetimes: self.datetimes,
            ids: self.ids,
            frames,
        })
    }
}

/// Propagate the last non-null value per id across `rows`, visited in `order`.
fn fill_along_time(rows: &mut [Vec<Value>], order: impl Iterator<Item = usize>) {
    let mut last: Vec<Option<Value>> = vec![None; rows.first().map_or(0, Vec::len)];
    for r in order {
        for (j, cell) in rows[r].iter_mut().enumerate() {
            if cell.is_null() {
                if let Some(v) = &last[j] {
                    *cell = v.clone();
                }
            } else {
                last[j] = Some(cell.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::end_of_day;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        end_of_day(NaiveDate::from_ymd_opt(2020, 1, d).unwrap())
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(ToString::to_string).collect()
    }

    fn sample() -> Cube {
        // close: A has 2nd and 6th, B only the 6th.
        let mut cube = Cube::filled(ids(&["close"]), vec![day(2), day(6)], ids(&["A", "B"]), &Value::Null);
        cube.set(0, 0, 0, Value::Float(10.0));
        cube.set(0, 1, 0, Value::Float(11.0));
        cube.set(0, 1, 1, Value::Float(20.0));
        cube
    }

    #[test]
    fn pad_carries_last_value_forward() {
        let cube = sample().conform_datetimes(&[day(3), day(6), day(7)], Some(FillMethod::Pad));
        assert_eq!(cube.datetimes, vec![day(3), day(6), day(7)]);
        assert_eq!(cube.get(0, 0, 0), &Value::Float(10.0));
        assert_eq!(cube.get(0, 0, 1), &Value::Null);
        assert_eq!(cube.get(0, 2, 1), &Value::Float(20.0));
    }

    #[test]
    fn backfill_carries_next_value_backward() {
        let cube = sample().conform_datetimes(&[day(1), day(3), day(9)], Some(FillMethod::Backfill));
        assert_eq!(cube.get(0, 0, 0), &Value::Float(10.0));
        assert_eq!(cube.get(0, 1, 1), &Value::Float(20.0));
        assert_eq!(cube.get(0, 2, 0), &Value::Null);
    }

    #[test]
    fn no_fill_selects_requested_rows_only() {
        let cube = sample().conform_datetimes(&[day(3), day(6)], None);
        assert_eq!(cube.get(0, 0, 0), &Value::Null);
        assert_eq!(cube.get(0, 1, 0), &Value::Float(11.0));
    }

    #[test]
    fn reindex_adds_missing_ids_and_drops_duplicates() {
        let cube = sample().reindex_ids(&ids(&["B", "C", "B"]), &Value::Int(0));
        assert_eq!(cube.ids, ids(&["B", "C"]));
        assert_eq!(cube.get(0, 1, 0), &Value::Float(20.0));
        assert_eq!(cube.get(0, 1, 1), &Value::Int(0));
    }

    #[test]
    fn panel_exposes_typed_frames() {
        let mut cube = Cube::filled(
            ids(&["close", "status"]),
            vec![day(2)],
            ids(&["A"]),
            &Value::Null,
        );
        cube.set(0, 0, 0, Value::Text("10.5".into()));
        cube.set(1, 0, 0, Value::Text("trading".into()));
        let panel = cube
            .into_panel(vec![FactorType::Double, FactorType::String])
            .unwrap();
        assert_eq!(panel.shape(), (2, 1, 1));
        assert_eq!(panel.value_f64("close", day(2), "A"), Some(10.5));
        assert_eq!(panel.value_str("status", day(2), "A").as_deref(), Some("trading"));
        assert_eq!(panel.value_f64("close", day(3), "A"), None);
        let frame = panel.frame("close").unwrap();
        let names: Vec<&str> = frame.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec![DATETIME_COL, "A"]);
    }

    #[test]
    fn empty_axes_still_build_frames() {
        let panel = Cube::filled(ids(&["close"]), Vec::new(), Vec::new(), &Value::Null)
            .into_panel(vec![FactorType::Double])
            .unwrap();
        assert!(panel.is_empty());
        assert_eq!(panel.shape(), (1, 0, 0));
        assert_eq!(panel.frame("close").unwrap().height(), 0);
    }
}
