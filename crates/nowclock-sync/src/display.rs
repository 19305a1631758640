use nowclock_proto::DisplayMode;

/// Rendering side of the engine.  Setters only record field values; nothing
/// reaches the screen until `redraw`, which renders a full frame from the
/// current values and must be safe to repeat.
///
/// The engine calls into the display only while holding its state lock, so
/// implementations never see interleaved updates.
pub trait Display: Send + 'static {
    fn set_mode(&mut self, mode: DisplayMode);

    fn set_track_fields(&mut self, title: &str, artist: &str, album: &str, track_number: &str);

    fn set_track_length(&mut self, duration: f64);

    fn set_progress(&mut self, elapsed: f64);

    fn redraw(&mut self) -> anyhow::Result<()>;
}
