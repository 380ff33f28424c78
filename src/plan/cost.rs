//! Join cost model.
//!
//! Relative work units, not wall-clock time: the constants only need to rank
//! strategies correctly for the table-size mixes this pipeline sees (one
//! huge tree table, mid-sized plot/condition tables, tiny population
//! reference tables).

/// Broadcast join: replicate the small side, stream the large one.
#[must_use]
pub fn broadcast_cost(left_rows: u64, right_rows: u64) -> f64 {
    let small = left_rows.min(right_rows) as f64;
    let large = left_rows.max(right_rows) as f64;
    2.0 * small + 0.5 * large
}

/// Hash join: build on the small side, probe with the large one.
#[must_use]
pub fn hash_cost(left_rows: u64, right_rows: u64) -> f64 {
    let small = left_rows.min(right_rows) as f64;
    let large = left_rows.max(right_rows) as f64;
    1.5 * small + 0.8 * large
}

/// Sort-merge join: linear merge plus an n·log2(n) sort term per side that
/// is not already sorted on the join keys.
#[must_use]
pub fn sort_merge_cost(
    left_rows: u64,
    right_rows: u64,
    left_sorted: bool,
    right_sorted: bool,
) -> f64 {
    let mut cost = (left_rows + right_rows) as f64;
    if !left_sorted {
        cost += sort_term(left_rows);
    }
    if !right_sorted {
        cost += sort_term(right_rows);
    }
    cost
}

fn sort_term(rows: u64) -> f64 {
    let n = rows.max(2) as f64;
    n * n.log2()
}
