//! Minimum-cost assignment (Kuhn-Munkres with potentials, O(n²m)).

/// Assign every row of `cost` to a distinct column minimizing the total cost.
///
/// Rows may be shorter than the widest row; missing entries cost `0.0`, as do
/// non-finite ones. With more rows than columns some rows stay unassigned
/// (`None`).
pub fn assign(cost: &[Vec<f64>]) -> Vec<Option<usize>> {
    let rows = cost.len();
    let cols = cost.iter().map(Vec::len).max().unwrap_or(0);
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }
    let at = |r: usize, c: usize| {
        cost.get(r)
            .and_then(|row| row.get(c))
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    };

    if rows <= cols {
        solve(rows, cols, at)
    } else {
        let by_column = solve(cols, rows, |c, r| at(r, c));
        let mut by_row = vec![None; rows];
        for (column, row) in by_column.into_iter().enumerate() {
            if let Some(row) = row {
                by_row[row] = Some(column);
            }
        }
        by_row
    }
}

/// `n <= m`. Returns the column of each of the `n` rows.
fn solve(n: usize, m: usize, cost: impl Fn(usize, usize) -> f64) -> Vec<Option<usize>> {
    // 1-based; index 0 is the virtual start column.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut owner = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for row in 1..=n {
        owner[0] = row;
        let mut j0 = 0;
        let mut min_v = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if reduced < min_v[j] {
                    min_v[j] = reduced;
                    way[j] = j0;
                }
                if min_v[j] < delta {
                    delta = min_v[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_v[j] -= delta;
                }
            }
            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![None; n];
    for (column, &row) in owner.iter().enumerate().skip(1) {
        if row != 0 {
            assignment[row - 1] = Some(column - 1);
        }
    }
    assignment
}
