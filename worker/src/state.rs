/// Persistent buffers reused across steps to avoid per-iteration allocations.
#[derive(Debug)]
pub struct WorkerState {
    /// Local snapshot of the parameters (flat).
    pub params: Vec<f32>,

    /// Gradient buffer (flat).
    pub grads: Vec<f32>,
}

impl WorkerState {
    pub fn new(num_params: usize) -> Self {
        Self {
            params: vec![0.0; num_params],
            grads: vec![0.0; num_params],
        }
    }
}
