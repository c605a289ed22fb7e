//! Request validation and defaulting.

use lumen_core::{GenerationRequest, LumenError, ModelConfig, Result, SizeConditioning};

/// Server-side bounds on request size.
#[derive(Debug, Clone, Copy)]
pub struct ParamLimits {
    pub max_steps: usize,
    pub max_dimension: usize,
    pub max_samples: usize,
    /// Latent rows per session: positive prompts times samples.
    pub max_batch: usize,
}

impl Default for ParamLimits {
    fn default() -> Self {
        Self {
            max_steps: 150,
            max_dimension: 2048,
            max_samples: 8,
            max_batch: 8,
        }
    }
}

/// A validated request with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub use_binary: bool,
    pub steps: usize,
    pub width: usize,
    pub height: usize,
    /// `None` draws a fresh seed from OS entropy.
    pub seed: Option<u64>,
    pub guidance_scale: f64,
    pub samples: usize,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub callback_steps: usize,
    /// Inclusive 1-based step from which previews are decoded.
    pub callback_start: usize,
    pub size: SizeConditioning,
}

impl ResolvedParams {
    pub fn batch_size(&self) -> usize {
        self.positive.len()
    }

    /// Rows in every latent and conditioning tensor before guidance doubling.
    pub fn rows(&self) -> usize {
        self.batch_size() * self.samples
    }

    pub fn do_guidance(&self) -> bool {
        self.guidance_scale > 1.0
    }
}

fn invalid(msg: impl Into<String>) -> LumenError {
    LumenError::InvalidRequest(msg.into())
}

fn resolve_dimension(
    name: &str,
    value: i64,
    model: &ModelConfig,
    limits: &ParamLimits,
) -> Result<usize> {
    if value < 0 {
        return Err(invalid(format!("{name} must not be negative, got {value}")));
    }
    let value = if value == 0 {
        model.default_resolution()
    } else {
        value as usize
    };
    if value % model.vae_scale_factor != 0 {
        return Err(invalid(format!(
            "{name} must be divisible by {}, got {value}",
            model.vae_scale_factor
        )));
    }
    if value > limits.max_dimension {
        return Err(invalid(format!(
            "{name} {value} exceeds the maximum of {}",
            limits.max_dimension
        )));
    }
    Ok(value)
}

/// Validate `request` and apply defaults.
pub fn resolve(
    request: &GenerationRequest,
    model: &ModelConfig,
    limits: &ParamLimits,
) -> Result<ResolvedParams> {
    if request.steps <= 0 {
        return Err(invalid(format!("steps must be positive, got {}", request.steps)));
    }
    let steps = request.steps as usize;
    if steps > limits.max_steps {
        return Err(invalid(format!(
            "steps {steps} exceeds the maximum of {}",
            limits.max_steps
        )));
    }
    if request.samples <= 0 {
        return Err(invalid(format!(
            "samples must be positive, got {}",
            request.samples
        )));
    }
    let samples = request.samples as usize;
    if samples > limits.max_samples {
        return Err(invalid(format!(
            "samples {samples} exceeds the maximum of {}",
            limits.max_samples
        )));
    }
    if request.callback_steps <= 0 {
        return Err(invalid(format!(
            "callback_steps must be positive, got {}",
            request.callback_steps
        )));
    }
    if !request.cfg_scale.is_finite() {
        return Err(invalid("cfg_scale must be finite"));
    }
    if let Some(p) = request.text_prompts.iter().find(|p| !p.weight.is_finite()) {
        return Err(invalid(format!("prompt {:?} has a non-finite weight", p.text)));
    }

    let width = resolve_dimension("width", request.width, model, limits)?;
    let height = resolve_dimension("height", request.height, model, limits)?;

    let positive = request.positive_prompts();
    let negative = request.negative_prompts();
    if positive.is_empty() && negative.is_empty() {
        return Err(invalid("no prompts with a non-zero weight"));
    }
    if positive.is_empty() {
        return Err(invalid("at least one positive prompt is required"));
    }
    if !(negative.len() <= 1 || negative.len() == positive.len()) {
        return Err(invalid(format!(
            "{} negative prompts cannot be paired with {} positive prompts",
            negative.len(),
            positive.len()
        )));
    }
    let rows = positive.len().saturating_mul(samples);
    if rows > limits.max_batch {
        return Err(invalid(format!(
            "{} prompts x {samples} samples is {rows} images, above the maximum of {}",
            positive.len(),
            limits.max_batch
        )));
    }

    Ok(ResolvedParams {
        use_binary: request.use_binary,
        steps,
        width,
        height,
        seed: (request.seed > 0).then_some(request.seed as u64),
        guidance_scale: request.cfg_scale,
        samples,
        positive,
        negative,
        callback_steps: request.callback_steps as usize,
        callback_start: request.callback_start.max(0) as usize,
        size: SizeConditioning {
            original_size: (height, width),
            crops_coords_top_left: (0, 0),
            target_size: (height, width),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::TextPrompt;

    fn request() -> GenerationRequest {
        GenerationRequest {
            use_binary: true,
            engine: "stable-diffusion-xl-1024-v1-0".into(),
            steps: 20,
            width: 0,
            height: 0,
            seed: 42,
            cfg_scale: 7.0,
            samples: 1,
            text_prompts: vec![
                TextPrompt {
                    text: "a lighthouse".into(),
                    weight: 1.0,
                },
                TextPrompt {
                    text: "fog".into(),
                    weight: -1.0,
                },
            ],
            callback_steps: 5,
            callback_start: 10,
        }
    }

    fn check(req: &GenerationRequest) -> Result<ResolvedParams> {
        resolve(req, &ModelConfig::default(), &ParamLimits::default())
    }

    #[test]
    fn test_defaults_applied() {
        let params = check(&request()).unwrap();
        assert_eq!((params.width, params.height), (1024, 1024));
        assert_eq!(params.seed, Some(42));
        assert!(params.do_guidance());
        assert_eq!(params.rows(), 1);
        assert_eq!(params.size.time_ids(), [1024.0, 1024.0, 0.0, 0.0, 1024.0, 1024.0]);
    }

    #[test]
    fn test_time_ids_follow_height_then_width() {
        let mut req = request();
        req.width = 1152;
        req.height = 896;
        let params = check(&req).unwrap();
        assert_eq!(params.size.time_ids(), [896.0, 1152.0, 0.0, 0.0, 896.0, 1152.0]);
    }

    #[test]
    fn test_zero_and_negative_seed_are_random() {
        let mut req = request();
        req.seed = 0;
        assert_eq!(check(&req).unwrap().seed, None);
        req.seed = -5;
        assert_eq!(check(&req).unwrap().seed, None);
    }

    #[test]
    fn test_invalid_counts_rejected() {
        let mut req = request();
        req.steps = 0;
        assert!(matches!(check(&req), Err(LumenError::InvalidRequest(_))));

        let mut req = request();
        req.samples = 0;
        assert!(check(&req).is_err());

        let mut req = request();
        req.callback_steps = 0;
        assert!(check(&req).is_err());

        let mut req = request();
        req.steps = 1000;
        assert!(check(&req).is_err());
    }

    #[test]
    fn test_dimensions_must_divide() {
        let mut req = request();
        req.width = 1020;
        assert!(check(&req).is_err());
        req.width = 4096;
        assert!(check(&req).is_err());
        req.width = -8;
        assert!(check(&req).is_err());
    }

    #[test]
    fn test_prompt_rules() {
        let mut req = request();
        req.text_prompts.retain(|p| p.weight < 0.0);
        assert!(check(&req).is_err());

        let mut req = request();
        req.text_prompts.iter_mut().for_each(|p| p.weight = 0.0);
        assert!(check(&req).is_err());

        let mut req = request();
        req.text_prompts.push(TextPrompt {
            text: "grain".into(),
            weight: -0.5,
        });
        assert!(check(&req).is_err());

        let mut req = request();
        req.text_prompts[0].weight = f64::NAN;
        assert!(check(&req).is_err());
    }

    #[test]
    fn test_batch_capped_across_prompts_and_samples() {
        let mut req = request();
        req.width = 2048;
        req.height = 2048;
        req.samples = 8;
        req.text_prompts = (0..500)
            .map(|i| TextPrompt {
                text: format!("prompt {i}"),
                weight: 1.0,
            })
            .collect();
        assert!(matches!(check(&req), Err(LumenError::InvalidRequest(_))));

        req.text_prompts.truncate(2);
        req.samples = 4;
        assert_eq!(check(&req).unwrap().rows(), 8);
        req.samples = 5;
        assert!(matches!(check(&req), Err(LumenError::InvalidRequest(_))));
    }

    #[test]
    fn test_non_finite_cfg_rejected() {
        let mut req = request();
        req.cfg_scale = f64::INFINITY;
        assert!(check(&req).is_err());
    }

    #[test]
    fn test_cfg_at_one_disables_guidance() {
        let mut req = request();
        req.cfg_scale = 1.0;
        assert!(!check(&req).unwrap().do_guidance());
    }
}
