use burn::prelude::*;

use crate::error::ShapeError;

/// Adversarial and reconstruction terms of the generator objective.
#[derive(Debug, Clone)]
pub struct GeneratorLoss<B: Backend> {
    /// `gan + l1_lambda * l1`; the only term that is backpropagated.
    pub total: Tensor<B, 1>,
    pub gan: Tensor<B, 1>,
    pub l1: Tensor<B, 1>,
}

/// Mean binary cross-entropy between raw logits and `{0, 1}` labels.
///
/// Uses `max(x, 0) - x * z + ln(1 + e^-|x|)`, which stays finite for large
/// logits of either sign.
pub fn bce_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    labels: Tensor<B, D>,
) -> Tensor<B, 1> {
    let positive = logits.clone().clamp_min(0.0);
    let soft = logits.clone().abs().neg().exp().log1p();
    (positive - logits * labels + soft).mean()
}

pub(crate) fn check_same<B: Backend, const D: usize>(
    what: &'static str,
    left: &Tensor<B, D>,
    right: &Tensor<B, D>,
) -> Result<(), ShapeError> {
    let (left, right) = (left.dims(), right.dims());
    if left != right {
        return Err(ShapeError::Operand {
            what,
            left: left.to_vec(),
            right: right.to_vec(),
        });
    }
    Ok(())
}

/// Generator objective: fool the discriminator on `disc_fake` while staying
/// close to `target` in L1.
pub fn generator_loss<B: Backend>(
    disc_fake: Tensor<B, 4>,
    gen_out: Tensor<B, 4>,
    target: Tensor<B, 4>,
    l1_lambda: f64,
) -> Result<GeneratorLoss<B>, ShapeError> {
    check_same("generator output vs target", &gen_out, &target)?;
    let gan = bce_with_logits(disc_fake.clone(), disc_fake.ones_like());
    let l1 = (target - gen_out).abs().mean();
    let total = gan.clone() + l1.clone().mul_scalar(l1_lambda);
    Ok(GeneratorLoss { total, gan, l1 })
}

/// Discriminator objective: real pairs labelled 1, generated pairs labelled 0.
///
/// The two cross-entropy terms are summed, not averaged.
pub fn discriminator_loss<B: Backend>(
    disc_real: Tensor<B, 4>,
    disc_fake: Tensor<B, 4>,
) -> Result<Tensor<B, 1>, ShapeError> {
    check_same("real vs generated logits", &disc_real, &disc_fake)?;
    let real = bce_with_logits(disc_real.clone(), disc_real.ones_like());
    let fake = bce_with_logits(disc_fake.clone(), disc_fake.zeros_like());
    Ok(real + fake)
}
