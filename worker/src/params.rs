use crate::Result;

/// Where a worker pulls parameters from and pushes gradients to.
///
/// A `ParamService` hides how the flat parameter vector is spread over the parameter
/// servers, callers always see the whole vector.
#[trait_variant::make(ParamService: Send)]
pub trait LocalParamService {
    /// The length of the flat parameter vector.
    fn num_params(&self) -> usize;

    /// Copies the current parameters into `out`.
    ///
    /// # Returns
    /// `false` if some server hasn't been initialized yet, `out` may be partially written then.
    async fn pull(&mut self, out: &mut [f32]) -> Result<bool>;

    /// Initializes the servers, only the first initialization a server receives has any effect.
    ///
    /// # Arguments
    /// * `step` - The global step to start counting from.
    /// * `params` - The initial parameters.
    async fn init(&mut self, step: u64, params: &[f32]) -> Result<()>;

    /// Applies a gradient.
    ///
    /// # Returns
    /// The global step after this gradient was counted.
    async fn push(&mut self, grad: &[f32]) -> Result<u64>;

    /// Closes the session with the servers.
    async fn disconnect(&mut self) -> Result<()>;
}
