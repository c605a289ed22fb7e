use lumen_core::{Backend, Conditioning, DType, LumenError, Result, TextConditioner};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Tokens per prompt embedding.
pub const SEQ_LEN: usize = 16;
/// Width of each token embedding and of the pooled embedding.
pub const HIDDEN: usize = 32;

const PAD_TOKEN: &str = "<|pad|>";

/// 64-bit FNV-1a. Stable across platforms and releases, unlike the std hasher.
fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn token_embedding(token: &str, out: &mut [f32]) {
    let mut rng = StdRng::seed_from_u64(fnv1a(token));
    for v in out.iter_mut() {
        *v = rng.gen_range(-1.0f32..1.0);
    }
}

/// Embeds prompts by seeding a generator from a hash of each
/// whitespace-separated token.
pub struct HashConditioner<B: Backend> {
    backend: B,
    force_zeros_for_empty_prompt: bool,
}

impl<B: Backend> HashConditioner<B> {
    pub fn new(backend: B, force_zeros_for_empty_prompt: bool) -> Self {
        Self {
            backend,
            force_zeros_for_empty_prompt,
        }
    }

    /// `(sequence, pooled)` for a single prompt: `SEQ_LEN * HIDDEN` and
    /// `HIDDEN` values.
    pub fn embed(&self, text: &str) -> (Vec<f32>, Vec<f32>) {
        let mut seq = vec![0.0f32; SEQ_LEN * HIDDEN];
        let mut tokens = text.split_whitespace();
        for row in seq.chunks_mut(HIDDEN) {
            let token = tokens.next().unwrap_or(PAD_TOKEN);
            token_embedding(&token.to_lowercase(), row);
        }
        let mut pooled = vec![0.0f32; HIDDEN];
        for row in seq.chunks(HIDDEN) {
            for (p, v) in pooled.iter_mut().zip(row) {
                *p += v;
            }
        }
        for p in pooled.iter_mut() {
            *p = (*p / SEQ_LEN as f32).tanh();
        }
        (seq, pooled)
    }

    fn stack(&self, prompts: &[&str], samples: usize) -> Result<(B::Tensor, B::Tensor)> {
        let rows = prompts.len() * samples;
        let mut seq = Vec::with_capacity(rows * SEQ_LEN * HIDDEN);
        let mut pooled = Vec::with_capacity(rows * HIDDEN);
        for prompt in prompts {
            let (s, p) = self.embed(prompt);
            for _ in 0..samples {
                seq.extend_from_slice(&s);
                pooled.extend_from_slice(&p);
            }
        }
        Ok((
            self.backend.copy_from_host_f32(&seq, &[rows, SEQ_LEN, HIDDEN])?,
            self.backend.copy_from_host_f32(&pooled, &[rows, HIDDEN])?,
        ))
    }
}

impl<B: Backend> TextConditioner for HashConditioner<B> {
    type T = B::Tensor;

    fn encode(
        &self,
        positive: &[String],
        negative: &[String],
        samples: usize,
    ) -> Result<Conditioning<B::Tensor>> {
        if positive.is_empty() || samples == 0 {
            return Err(LumenError::InvalidArgument(
                "at least one positive prompt and one sample are required".into(),
            ));
        }
        let positive_refs: Vec<&str> = positive.iter().map(String::as_str).collect();
        let (prompt_embeds, pooled_prompt_embeds) = self.stack(&positive_refs, samples)?;

        let (negative_prompt_embeds, negative_pooled_prompt_embeds) = match negative.len() {
            0 if self.force_zeros_for_empty_prompt => {
                let rows = positive.len() * samples;
                (
                    self.backend
                        .allocate_zeros(&[rows, SEQ_LEN, HIDDEN], DType::F32)?,
                    self.backend.allocate_zeros(&[rows, HIDDEN], DType::F32)?,
                )
            }
            0 => self.stack(&vec![""; positive.len()], samples)?,
            1 => self.stack(&vec![negative[0].as_str(); positive.len()], samples)?,
            n if n == positive.len() => {
                let refs: Vec<&str> = negative.iter().map(String::as_str).collect();
                self.stack(&refs, samples)?
            }
            n => {
                return Err(LumenError::InvalidArgument(format!(
                    "{n} negative prompts cannot be aligned to {} positive prompts",
                    positive.len()
                )))
            }
        };

        Ok(Conditioning {
            prompt_embeds,
            negative_prompt_embeds,
            pooled_prompt_embeds,
            negative_pooled_prompt_embeds,
        })
    }
}
