/// Formats a duration in seconds as `HH:MM:SS.mmm`.
pub fn time_str(sec: f64) -> String {
    let ms = (sec * 1000.0) as u64;

    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        ms % 3_600_000 / 60_000,
        ms % 60_000 / 1000,
        ms % 1000
    )
}

#[test]
fn formats_subsecond_precision() {
    assert_eq!(time_str(0.0), "00:00:00.000");
    assert_eq!(time_str(1.5), "00:00:01.500");
    assert_eq!(time_str(3_725.25), "01:02:05.250");
}
