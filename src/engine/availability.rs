use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Units held by ACTIVE reservations overlapping `range`.
///
/// Any two overlapping reservations share at least one day with the request,
/// so the plain sum bounds worst-case concurrent demand from above.
pub fn reserved_quantity(pool: &PoolState, range: &DateRange) -> u32 {
    let total: u64 = pool
        .active_overlapping(range)
        .map(|r| u64::from(r.quantity))
        .sum();
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Whether `requested` more units fit in `pool` for the whole of `range`.
pub fn assess(pool: &PoolState, range: &DateRange, requested: u32) -> Availability {
    let reserved = reserved_quantity(pool, range);
    let free = pool.stock.saturating_sub(reserved);
    let available = free >= requested;
    let message = (!available).then(|| {
        if free == 0 {
            format!("all {} units are reserved during {range}", pool.stock)
        } else {
            format!(
                "only {free} of {} units free during {range}, {requested} requested",
                pool.stock
            )
        }
    });
    Availability {
        available,
        available_quantity: free,
        message,
    }
}

/// Per-day occupancy over `window`, for calendar views.
///
/// Difference array over the window: +q on the first covered day, -q on the
/// day after the last covered day, then a running sum.
pub fn daily_usage(pool: &PoolState, window: &DateRange) -> Vec<DayUsage> {
    let n = window.days().max(0) as usize;
    let mut delta = vec![0i64; n + 1];
    for r in pool.active_overlapping(window) {
        let from = (r.range.start.max(window.start) - window.start).num_days() as usize;
        let to = (r.range.end.min(window.end) - window.start).num_days() as usize;
        delta[from] += i64::from(r.quantity);
        delta[to] -= i64::from(r.quantity);
    }

    let mut running = 0i64;
    window
        .iter_days()
        .zip(delta)
        .map(|(date, d)| {
            running += d;
            let reserved = u32::try_from(running.max(0)).unwrap_or(u32::MAX);
            DayUsage {
                date,
                reserved,
                free: pool.stock.saturating_sub(reserved),
            }
        })
        .collect()
}

/// Sweep-line: highest number of units reserved on any single day.
/// Ends sort before starts on the same day because ranges are half-open.
pub fn peak_usage<'a>(reservations: impl IntoIterator<Item = &'a Reservation>) -> u32 {
    let mut events: Vec<(chrono::NaiveDate, i64)> = Vec::new();
    for r in reservations {
        events.push((r.range.start, i64::from(r.quantity)));
        events.push((r.range.end, -i64::from(r.quantity)));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut running = 0i64;
    let mut peak = 0i64;
    for (_, delta) in events {
        running += delta;
        peak = peak.max(running);
    }
    u32::try_from(peak).unwrap_or(u32::MAX)
}
