//! An augmented password-authenticated key exchange in the OPAQUE style.
//!
//! The host stores an [`AuthRecord`] derived from the password rather than
//! the password itself. A later login run gives both sides the same
//! [`SessionKey`] without the password ever crossing the wire, and hands the
//! client back the extra data it bound at registration.
//!
//! Everything here is a pure transform over supplied byte strings; protocol
//! messages are returned for an external transport to carry. Key generation
//! takes a caller-supplied secure random source.

use blake2::{Blake2b512, Blake2sMac256, Digest};
use curve25519_dalek::{RistrettoPoint, Scalar};
use digest::Mac;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use sphinx_marshalling::bytes;

mod envelope;

pub use envelope::Envelope;
use envelope::EnvelopeContents;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PakeError {
    /// The password does not match the stored record, or a protocol message
    /// was tampered with. Deliberately not more specific than that.
    AuthenticationFailed,
}

impl core::fmt::Display for PakeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AuthenticationFailed => f.write_str("authentication failed"),
        }
    }
}

impl std::error::Error for PakeError {}

/// The per-record state the host persists. Opaque to inspection: nothing in
/// it reveals the password or the hardened secret.
#[derive(Clone, Deserialize, Serialize)]
pub struct AuthRecord {
    oprf_key: sphinx_oprf::PrivateKey,
    #[serde(with = "bytes")]
    server_private_key: Scalar,
    #[serde(with = "bytes")]
    client_public_key: RistrettoPoint,
    envelope: Envelope,
}

impl core::fmt::Debug for AuthRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthRecord").finish_non_exhaustive()
    }
}

/// Unilateral registration: the client builds the whole record locally and
/// hands it to the host for storage.
pub fn register<Rng: RngCore + CryptoRng + Send>(
    password: &[u8],
    extra: &[u8],
    rng: &mut Rng,
) -> AuthRecord {
    let oprf_key = sphinx_oprf::PrivateKey::new_random(rng);
    let hardened = sphinx_oprf::unoblivious_evaluate(&oprf_key, password);

    let server_private_key = Scalar::random(rng);
    let server_public_key = RistrettoPoint::mul_base(&server_private_key);
    let client_private_key = Scalar::random(rng);
    let client_public_key = RistrettoPoint::mul_base(&client_private_key);

    let envelope = Envelope::seal(
        &hardened,
        &EnvelopeContents {
            client_private_key,
            server_public_key,
            extra: extra.to_vec(),
        },
        rng,
    );

    AuthRecord {
        oprf_key,
        server_private_key,
        client_public_key,
        envelope,
    }
}

/// First message of the private registration variant.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistrationRequest {
    pub blinded_input: sphinx_oprf::BlindedInput,
}

/// The host's answer in the private registration variant: its OPRF
/// evaluation and the public half of the keypair it contributed.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistrationResponse {
    pub blinded_result: sphinx_oprf::BlindedResult,
    #[serde(with = "bytes")]
    pub server_public_key: RistrettoPoint,
}

/// The client's half of the record in the private registration variant.
#[derive(Clone, Deserialize, Serialize)]
pub struct RegistrationRecord {
    #[serde(with = "bytes")]
    client_public_key: RistrettoPoint,
    envelope: Envelope,
}

impl core::fmt::Debug for RegistrationRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegistrationRecord").finish_non_exhaustive()
    }
}

/// Client state for the private registration variant, where the host
/// contributes the OPRF key and its own keypair instead of trusting the
/// client to generate them. Two round trips.
pub struct PrivateRegistration {
    password: Vec<u8>,
    blinding_factor: sphinx_oprf::BlindingFactor,
}

impl PrivateRegistration {
    pub fn start<Rng: RngCore + CryptoRng + Send>(
        password: &[u8],
        rng: &mut Rng,
    ) -> (Self, RegistrationRequest) {
        let (blinding_factor, blinded_input) = sphinx_oprf::start(password, rng);
        (
            Self {
                password: password.to_vec(),
                blinding_factor,
            },
            RegistrationRequest { blinded_input },
        )
    }

    pub fn finish<Rng: RngCore + CryptoRng + Send>(
        self,
        response: &RegistrationResponse,
        extra: &[u8],
        rng: &mut Rng,
    ) -> RegistrationRecord {
        let hardened =
            sphinx_oprf::finish(&self.password, &self.blinding_factor, &response.blinded_result);

        let client_private_key = Scalar::random(rng);
        let client_public_key = RistrettoPoint::mul_base(&client_private_key);

        let envelope = Envelope::seal(
            &hardened,
            &EnvelopeContents {
                client_private_key,
                server_public_key: response.server_public_key,
                extra: extra.to_vec(),
            },
            rng,
        );

        RegistrationRecord {
            client_public_key,
            envelope,
        }
    }
}

impl Drop for PrivateRegistration {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Host state for the private registration variant.
pub struct ServerRegistration {
    oprf_key: sphinx_oprf::PrivateKey,
    server_private_key: Scalar,
}

impl ServerRegistration {
    pub fn respond<Rng: RngCore + CryptoRng + Send>(
        request: &RegistrationRequest,
        rng: &mut Rng,
    ) -> (Self, RegistrationResponse) {
        let oprf_key = sphinx_oprf::PrivateKey::new_random(rng);
        let blinded_result = sphinx_oprf::blind_evaluate(&oprf_key, &request.blinded_input);

        let server_private_key = Scalar::random(rng);
        let server_public_key = RistrettoPoint::mul_base(&server_private_key);

        (
            Self {
                oprf_key,
                server_private_key,
            },
            RegistrationResponse {
                blinded_result,
                server_public_key,
            },
        )
    }

    pub fn finish(self, record: RegistrationRecord) -> AuthRecord {
        AuthRecord {
            oprf_key: self.oprf_key,
            server_private_key: self.server_private_key,
            client_public_key: record.client_public_key,
            envelope: record.envelope,
        }
    }
}

/// Client's opening message of a login run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub blinded_input: sphinx_oprf::BlindedInput,
    #[serde(with = "bytes")]
    pub client_ephemeral: RistrettoPoint,
}

/// Host's answer: OPRF evaluation, its own ephemeral, the stored envelope,
/// and proof that it derived the same session key.
#[derive(Clone, Deserialize, Serialize)]
pub struct LoginResponse {
    pub blinded_result: sphinx_oprf::BlindedResult,
    #[serde(with = "bytes")]
    pub server_ephemeral: RistrettoPoint,
    pub envelope: Envelope,
    #[serde(with = "bytes")]
    pub server_confirmation: [u8; 32],
}

impl core::fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginResponse").finish_non_exhaustive()
    }
}

/// Client's key-confirmation message, proving it opened the envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Confirmation(#[serde(with = "bytes")] [u8; 32]);

/// The symmetric key both sides share after a successful run. Single-use:
/// one session authenticates exactly one operation.
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn expose_secret(&self) -> &[u8; 32] {
        &self.0
    }
}

impl core::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionKey(REDACTED)")
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// What the client gets out of a successful login.
#[cfg_attr(test, derive(Debug))]
pub struct LoginOutcome {
    pub session_key: SessionKey,
    /// The extra data bound at registration.
    pub extra: Vec<u8>,
    /// To be sent to the host; the host will not act before verifying it.
    pub confirmation: Confirmation,
}

/// Client side of a login run.
pub struct ClientLogin {
    password: Vec<u8>,
    blinding_factor: sphinx_oprf::BlindingFactor,
    ephemeral_private: Scalar,
    request: LoginRequest,
}

impl ClientLogin {
    pub fn start<Rng: RngCore + CryptoRng + Send>(
        password: &[u8],
        rng: &mut Rng,
    ) -> (Self, LoginRequest) {
        let (blinding_factor, blinded_input) = sphinx_oprf::start(password, rng);
        let ephemeral_private = Scalar::random(rng);
        let request = LoginRequest {
            blinded_input,
            client_ephemeral: RistrettoPoint::mul_base(&ephemeral_private),
        };
        (
            Self {
                password: password.to_vec(),
                blinding_factor,
                ephemeral_private,
                request: request.clone(),
            },
            request,
        )
    }

    /// Completes the exchange. Fails closed if the password does not match
    /// the record the host used, or if the host's confirmation is wrong.
    pub fn finish(self, response: &LoginResponse) -> Result<LoginOutcome, PakeError> {
        let hardened =
            sphinx_oprf::finish(&self.password, &self.blinding_factor, &response.blinded_result);
        let contents = response.envelope.open(&hardened)?;

        let client_public = RistrettoPoint::mul_base(&contents.client_private_key);
        let transcript = transcript_hash(
            &self.request,
            &response.blinded_result,
            &response.server_ephemeral,
            &client_public,
            &contents.server_public_key,
        );

        let shared = [
            self.ephemeral_private * response.server_ephemeral,
            self.ephemeral_private * contents.server_public_key,
            contents.client_private_key * response.server_ephemeral,
        ];
        let (session_key, confirmation_key) = derive_session_keys(&shared, &transcript);

        let expected = confirmation_mac(&confirmation_key, b"host confirmation", &transcript);
        if !bool::from(expected.ct_eq(&response.server_confirmation)) {
            return Err(PakeError::AuthenticationFailed);
        }

        let confirmation = confirmation_mac(&confirmation_key, b"client confirmation", &transcript);
        Ok(LoginOutcome {
            session_key,
            extra: contents.extra.clone(),
            confirmation: Confirmation(confirmation),
        })
    }
}

impl Drop for ClientLogin {
    fn drop(&mut self) {
        self.password.zeroize();
        self.ephemeral_private.zeroize();
    }
}

/// Host side of a login run.
pub struct ServerLogin {
    session_key: SessionKey,
    expected_confirmation: [u8; 32],
}

impl ServerLogin {
    /// Responds to a login request using the stored record. This succeeds
    /// even for a wrong password; the run only diverges at envelope opening
    /// and key confirmation, so the transcript alone is no dictionary
    /// oracle.
    pub fn respond<Rng: RngCore + CryptoRng + Send>(
        record: &AuthRecord,
        request: &LoginRequest,
        rng: &mut Rng,
    ) -> (Self, LoginResponse) {
        let blinded_result = sphinx_oprf::blind_evaluate(&record.oprf_key, &request.blinded_input);

        let ephemeral_private = Scalar::random(rng);
        let server_ephemeral = RistrettoPoint::mul_base(&ephemeral_private);
        let server_public = RistrettoPoint::mul_base(&record.server_private_key);

        let transcript = transcript_hash(
            request,
            &blinded_result,
            &server_ephemeral,
            &record.client_public_key,
            &server_public,
        );

        let shared = [
            ephemeral_private * request.client_ephemeral,
            record.server_private_key * request.client_ephemeral,
            ephemeral_private * record.client_public_key,
        ];
        let (session_key, confirmation_key) = derive_session_keys(&shared, &transcript);

        let server_confirmation =
            confirmation_mac(&confirmation_key, b"host confirmation", &transcript);
        let expected_confirmation =
            confirmation_mac(&confirmation_key, b"client confirmation", &transcript);

        (
            Self {
                session_key,
                expected_confirmation,
            },
            LoginResponse {
                blinded_result,
                server_ephemeral,
                envelope: record.envelope.clone(),
                server_confirmation,
            },
        )
    }

    /// Verifies the client's key confirmation and releases the session key.
    pub fn finish(self, confirmation: &Confirmation) -> Result<SessionKey, PakeError> {
        if bool::from(self.expected_confirmation.ct_eq(&confirmation.0)) {
            Ok(self.session_key)
        } else {
            Err(PakeError::AuthenticationFailed)
        }
    }
}

/// Derives a 32-byte working key from the hardened secret and a context
/// label. This is the one key-schedule step everything downstream of the
/// OPRF uses; give each purpose its own context.
pub fn derive_key(hardened_secret: &sphinx_oprf::Output, context: &[u8]) -> [u8; 32] {
    let digest: [u8; 64] = Blake2b512::new()
        .chain_update(hardened_secret.expose_secret())
        .chain_update(context)
        .finalize()
        .into();
    digest[..32].try_into().unwrap()
}

fn transcript_hash(
    request: &LoginRequest,
    blinded_result: &sphinx_oprf::BlindedResult,
    server_ephemeral: &RistrettoPoint,
    client_public: &RistrettoPoint,
    server_public: &RistrettoPoint,
) -> [u8; 64] {
    Blake2b512::new()
        .chain_update(request.blinded_input.as_point().compress().as_bytes())
        .chain_update(request.client_ephemeral.compress().as_bytes())
        .chain_update(blinded_result.as_point().compress().as_bytes())
        .chain_update(server_ephemeral.compress().as_bytes())
        .chain_update(client_public.compress().as_bytes())
        .chain_update(server_public.compress().as_bytes())
        .finalize()
        .into()
}

/// Triple-DH key schedule: ephemeral-ephemeral, ephemeral-static, and
/// static-ephemeral shares, bound to the transcript. Splits into a session
/// key and a confirmation key.
fn derive_session_keys(shared: &[RistrettoPoint; 3], transcript: &[u8; 64]) -> (SessionKey, [u8; 32]) {
    let digest: [u8; 64] = Blake2b512::new()
        .chain_update(shared[0].compress().as_bytes())
        .chain_update(shared[1].compress().as_bytes())
        .chain_update(shared[2].compress().as_bytes())
        .chain_update(transcript)
        .finalize()
        .into();
    (
        SessionKey(digest[..32].try_into().unwrap()),
        digest[32..].try_into().unwrap(),
    )
}

fn confirmation_mac(key: &[u8; 32], label: &[u8], transcript: &[u8; 64]) -> [u8; 32] {
    let mac: [u8; 32] = Blake2sMac256::new_from_slice(key)
        .expect("fixed-size key")
        .chain_update(label)
        .chain_update(transcript)
        .finalize()
        .into_bytes()
        .into();
    mac
}
