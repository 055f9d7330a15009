//! An oblivious pseudorandom function over the ristretto255 group.
//!
//! The client blinds its input with [`start`], the host applies its
//! long-term key with [`blind_evaluate`], and the client removes the blind
//! with [`finish`]. The host sees only uniformly random group elements and
//! learns nothing about the input; the client learns `F(key, input)` and
//! nothing about the key. [`unoblivious_evaluate`] computes the same
//! function directly for a party that holds both the key and the input.

use blake2::{Blake2b512, Digest};
use curve25519_dalek::{ristretto::CompressedRistretto, RistrettoPoint, Scalar};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroize;

use sphinx_marshalling::bytes;

/// Blinds `input` for evaluation by a key holder.
///
/// The blinding factor must be kept until [`finish`] and never reused for
/// another invocation. Reuse does not break correctness, but it lets the
/// key holder correlate exchanges made with the same input.
pub fn start<Rng: RngCore + CryptoRng + Send>(
    input: &[u8],
    rng: &mut Rng,
) -> (BlindingFactor, BlindedInput) {
    let blinding_factor = BlindingFactor::new_random(rng);
    let blinded_input = BlindedInput::new_deterministic(&blinding_factor, input);
    (blinding_factor, blinded_input)
}

/// Host-side evaluation: applies the long-term key to a blinded input.
///
/// Pure scalar multiplication; the host learns nothing about the underlying
/// input.
pub fn blind_evaluate(key: &PrivateKey, blinded_input: &BlindedInput) -> BlindedResult {
    BlindedResult(key.as_scalar() * blinded_input.as_point())
}

/// Unblinds the host's evaluation and hashes the result to remove its
/// algebraic structure.
///
/// The output depends only on `input` and the evaluation key: for any
/// blinding factor, `finish(input, bf, blind_evaluate(key, blinded))` equals
/// `unoblivious_evaluate(key, input)`.
pub fn finish(
    input: &[u8],
    blinding_factor: &BlindingFactor,
    blinded_result: &BlindedResult,
) -> Output {
    let unblinded = blinding_factor.as_scalar().invert() * blinded_result.as_point();
    Output::new(input, &unblinded)
}

/// Evaluates the function directly, without blinding, for a party holding
/// both the key and the input.
pub fn unoblivious_evaluate(key: &PrivateKey, input: &[u8]) -> Output {
    let evaluated = key.as_scalar() * hash_to_group(input);
    Output::new(input, &evaluated)
}

/// Maps an arbitrary byte string to a group element with no known discrete
/// log relative to the generator.
fn hash_to_group(input: &[u8]) -> RistrettoPoint {
    let uniform: [u8; 64] = Blake2b512::digest(input).into();
    RistrettoPoint::from_uniform_bytes(&uniform)
}

/// The long-term evaluation key. One per host, never transmitted.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct PrivateKey(#[serde(with = "bytes")] Scalar);

impl PrivateKey {
    pub fn new_random<Rng: RngCore + CryptoRng + Send>(rng: &mut Rng) -> Self {
        Self(Scalar::random(rng))
    }

    pub fn as_scalar(&self) -> &Scalar {
        &self.0
    }
}

impl core::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PrivateKey(REDACTED)")
    }
}

impl From<Scalar> for PrivateKey {
    fn from(value: Scalar) -> Self {
        Self(value)
    }
}

impl TryFrom<[u8; 32]> for PrivateKey {
    type Error = &'static str;

    fn try_from(value: [u8; 32]) -> Result<Self, Self::Error> {
        Ok(Self(
            Option::from(Scalar::from_canonical_bytes(value)).ok_or("invalid scalar")?,
        ))
    }
}

/// The client's ephemeral blind. Held for one exchange, then discarded.
pub struct BlindingFactor(Scalar);

impl BlindingFactor {
    pub fn new_random<Rng: RngCore + CryptoRng + Send>(rng: &mut Rng) -> Self {
        Self(Scalar::random(rng))
    }

    pub fn as_scalar(&self) -> &Scalar {
        &self.0
    }
}

impl core::fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("BlindingFactor(REDACTED)")
    }
}

impl Drop for BlindingFactor {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl TryFrom<[u8; 32]> for BlindingFactor {
    type Error = &'static str;

    fn try_from(value: [u8; 32]) -> Result<Self, Self::Error> {
        Ok(Self(
            Option::from(Scalar::from_canonical_bytes(value)).ok_or("invalid scalar")?,
        ))
    }
}

/// A blinded input, safe for the key holder to see.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlindedInput(#[serde(with = "bytes")] RistrettoPoint);

impl BlindedInput {
    pub fn new_deterministic(blinding_factor: &BlindingFactor, input: &[u8]) -> Self {
        Self(blinding_factor.as_scalar() * hash_to_group(input))
    }

    pub fn as_point(&self) -> &RistrettoPoint {
        &self.0
    }
}

impl From<RistrettoPoint> for BlindedInput {
    fn from(value: RistrettoPoint) -> Self {
        Self(value)
    }
}

impl TryFrom<[u8; 32]> for BlindedInput {
    type Error = &'static str;

    fn try_from(value: [u8; 32]) -> Result<Self, Self::Error> {
        Ok(Self(
            CompressedRistretto(value)
                .decompress()
                .ok_or("invalid point")?,
        ))
    }
}

/// The key holder's evaluation of a blinded input.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlindedResult(#[serde(with = "bytes")] RistrettoPoint);

impl BlindedResult {
    pub fn as_point(&self) -> &RistrettoPoint {
        &self.0
    }
}

impl From<RistrettoPoint> for BlindedResult {
    fn from(value: RistrettoPoint) -> Self {
        Self(value)
    }
}

impl TryFrom<[u8; 32]> for BlindedResult {
    type Error = &'static str;

    fn try_from(value: [u8; 32]) -> Result<Self, Self::Error> {
        Ok(Self(
            CompressedRistretto(value)
                .decompress()
                .ok_or("invalid point")?,
        ))
    }
}

/// The hardened secret: `F(key, input)` hashed down to 64 bytes.
///
/// Ephemeral by design, recomputed on every operation and wiped on drop.
pub struct Output([u8; 64]);

impl Output {
    fn new(input: &[u8], evaluated: &RistrettoPoint) -> Self {
        let input_hash: [u8; 64] = Blake2b512::digest(input).into();
        let output: [u8; 64] = Blake2b512::new()
            .chain_update(input_hash)
            .chain_update(evaluated.compress().as_bytes())
            .finalize()
            .into();
        Self(output)
    }

    pub fn expose_secret(&self) -> &[u8; 64] {
        &self.0
    }
}

impl core::fmt::Debug for Output {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Output(REDACTED)")
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl ConstantTimeEq for Output {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl From<[u8; 64]> for Output {
    fn from(value: [u8; 64]) -> Self {
        Self(value)
    }
}
