//! Re-association of returned rows to input positions by primary key.

use std::collections::HashMap;
use uuid::Uuid;

/// Reorders `records` to follow `order`.
///
/// Returns `Err(records)` untouched when the mapping is not a bijection:
/// length mismatch, a nil or repeated key in `order`, a returned key that
/// is nil, unknown or seen twice, or an input position left unfilled.
pub(crate) fn reorder_by_id<T>(
    records: Vec<T>,
    order: &[Uuid],
    get_id: impl Fn(&T) -> Uuid,
) -> Result<Vec<T>, Vec<T>> {
    if records.is_empty() {
        return Ok(records);
    }
    let Some(targets) = target_positions(&records, order, get_id) else {
        return Err(records);
    };

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(records.len()).collect();
    for (record, index) in records.into_iter().zip(targets) {
        slots[index] = Some(record);
    }
    Ok(slots.into_iter().flatten().collect())
}

fn target_positions<T>(
    records: &[T],
    order: &[Uuid],
    get_id: impl Fn(&T) -> Uuid,
) -> Option<Vec<usize>> {
    if order.len() != records.len() {
        return None;
    }

    let mut positions: HashMap<Uuid, usize> = HashMap::with_capacity(order.len());
    for (index, id) in order.iter().enumerate() {
        if id.is_nil() || positions.insert(*id, index).is_some() {
            return None;
        }
    }

    let mut targets = Vec::with_capacity(records.len());
    let mut filled = vec![false; records.len()];
    for record in records {
        let id = get_id(record);
        if id.is_nil() {
            return None;
        }
        let index = *positions.get(&id)?;
        if filled[index] {
            return None;
        }
        filled[index] = true;
        targets.push(index);
    }
    filled.iter().all(|slot| *slot).then_some(targets)
}
