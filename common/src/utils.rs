use std::time::Instant;

/// Elapsed wall-clock time since `start`, in milliseconds.
pub fn elapsed_ms(start: Instant) -> f32 {
    start.elapsed().as_secs_f32() * 1000.0
}

/// Index of the maximum element, by `f32` value. Returns `None` for an
/// empty slice; ties resolve to the first maximum.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        match best {
            Some(b) if values[b] >= *v => {}
            _ => best = Some(i),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_first_of_ties() {
        assert_eq!(argmax(&[0.5, 0.9, 0.9, 0.1]), Some(1));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[-1.0, -3.0]), Some(0));
    }
}
