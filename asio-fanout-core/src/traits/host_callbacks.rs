/// Notifications delivered to the host application.
///
/// `buffer_switch` is called from the render thread exactly once per
/// rendered period; implementations must return quickly.
pub trait HostCallbacks: Send + Sync {
    /// The host owns buffer half `index` now and should fill it, then call
    /// `output_ready`.
    fn buffer_switch(&self, index: usize, direct_process: bool);

    /// Driver parameters changed; the host must dispose and recreate buffers.
    fn reset_request(&self) {}
}
