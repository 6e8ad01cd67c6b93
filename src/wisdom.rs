//! Process-wide wisdom store: accumulated planning records shared by all
//! plan creations, with explicit file import/export.
//!
//! Wisdom is an optimization, not a correctness requirement: a failed
//! import leaves the store untouched and later plan creation simply starts
//! from empty heuristics. Import and export run under the same process-wide
//! lock as plan creation, so merges cannot race with planning.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::buffer::checked_shape_len;
use crate::error::{FftError, FftResult};
use crate::plan::{with_planner, PlanKey};
use crate::{direction_name, family_name, rigor_name};

/// One persisted wisdom entry: a plan geometry and how many plans it has
/// served in this or previous processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WisdomRecord {
    pub key: PlanKey,
    pub plans: u64,
}

/// Reads wisdom records from `path` and merges them into the process-wide
/// store, pre-warming the backend planners for each imported geometry.
///
/// A missing or malformed file yields [`FftError::ImportFailure`] and
/// leaves the store unchanged; callers may ignore the error.
pub fn import<P: AsRef<Path>>(path: P) -> FftResult<()> {
    let path = path.as_ref();
    let import_failure = |reason: String| FftError::ImportFailure {
        path: path.display().to_string(),
        reason,
    };
    let text = fs::read_to_string(path).map_err(|err| import_failure(err.to_string()))?;
    let records: Vec<WisdomRecord> =
        serde_json::from_str(&text).map_err(|err| import_failure(err.to_string()))?;

    with_planner(|state| {
        for record in &records {
            // Wisdom is best-effort: entries with an unusable geometry are
            // skipped rather than failing the whole merge.
            if checked_shape_len(&record.key.shape).is_err() {
                continue;
            }
            state.prewarm(&record.key);
            *state.wisdom.entry(record.key.clone()).or_insert(0) += record.plans;
        }
    });
    Ok(())
}

/// Serializes the current wisdom records to `path`, overwriting any
/// existing content.
pub fn export<P: AsRef<Path>>(path: P) -> FftResult<()> {
    let path = path.as_ref();
    let export_failure = |reason: String| FftError::ExportFailure {
        path: path.display().to_string(),
        reason,
    };
    let records = with_planner(|state| {
        state
            .wisdom
            .iter()
            .map(|(key, &plans)| WisdomRecord {
                key: key.clone(),
                plans,
            })
            .collect::<Vec<_>>()
    });
    let text =
        serde_json::to_string_pretty(&records).map_err(|err| export_failure(err.to_string()))?;
    fs::write(path, text).map_err(|err| export_failure(err.to_string()))
}

/// Human-readable dump of the accumulated wisdom, in deterministic order.
#[must_use]
pub fn current() -> String {
    with_planner(|state| {
        let mut out = format!("{} wisdom entries\n", state.wisdom.len());
        for (key, plans) in &state.wisdom {
            let shape = key
                .shape
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("x");
            out.push_str(&format!(
                "{} {} {} {} plans={}\n",
                family_name(key.family),
                shape,
                direction_name(key.direction),
                rigor_name(key.rigor),
                plans,
            ));
        }
        out
    })
}

/// Discards all accumulated wisdom. Plan creation keeps working; later
/// plans simply repopulate the store.
pub fn clear() {
    with_planner(|state| state.wisdom.clear());
}

#[cfg(test)]
mod tests {
    use super::current;
    use crate::buffer::PinnedBuffer;
    use crate::plan::C2cPlan;
    use crate::{Complex64, Direction, PlannerFlags};

    #[test]
    fn current_lists_planned_geometries() {
        let len = 149;
        let mut a = vec![Complex64::new(0.0, 0.0); len];
        let mut b = vec![Complex64::new(0.0, 0.0); len];
        let mut input = PinnedBuffer::new(&mut a);
        let mut output = PinnedBuffer::new(&mut b);
        let plan = C2cPlan::create(
            &mut input,
            &mut output,
            Direction::Backward,
            PlannerFlags::default(),
            1,
        )
        .expect("validation passes");
        assert!(plan.is_some());

        let dump = current();
        assert!(dump.contains("c2c 149 backward estimate"));
    }
}
