//! Per-party ephemeral material for one presignature: a share scalar
//! (decoded from the opaque DKG share bytes) and a freshly sampled
//! nonce. Kept in its own module because the Lagrange arithmetic and
//! share decoding are shared between `SignSession::process_round` and
//! `finalize`.

use k256::elliptic_curve::{Field, PrimeField};
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{WalletError, WalletResult};

/// One cooperating party's state for a single signing session. The share
/// scalar and nonce are wiped on drop, on every exit path — a normal
/// return, an early `?`, or the TTL sweeper reaping an abandoned session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SignParty {
    #[zeroize(skip)]
    pub party_index: u8,
    pub share: Scalar,
    pub nonce: Scalar,
}

impl SignParty {
    pub fn new(party_index: u8, share_bytes: &[u8]) -> WalletResult<Self> {
        let share = decode_scalar(share_bytes)?;
        Ok(Self {
            party_index,
            share,
            nonce: Scalar::random(OsRng),
        })
    }

    pub fn nonce_point(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * self.nonce
    }

    /// The 1-indexed x-coordinate this party's share was evaluated at
    /// during DKG (party indices are zero-indexed).
    pub fn x_coordinate(&self) -> Scalar {
        Scalar::from(u64::from(self.party_index) + 1)
    }
}

pub fn decode_scalar(bytes: &[u8]) -> WalletResult<Scalar> {
    if bytes.len() != 32 {
        return Err(WalletError::InvalidInput("share is not a 32-byte scalar".to_string()));
    }
    let mut repr = [0u8; 32];
    repr.copy_from_slice(bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr.into()))
        .ok_or_else(|| WalletError::InvalidInput("share is not a valid curve scalar".to_string()))
}

/// Lagrange coefficient for reconstructing a degree-1 polynomial's value
/// at `x=0` from two known sample points, evaluated for the point at
/// `self_x`: `other_x / (other_x - self_x)`.
pub fn lagrange_coefficient(self_x: Scalar, other_x: Scalar) -> WalletResult<Scalar> {
    let denom = other_x - self_x;
    let inv = Option::<Scalar>::from(denom.invert())
        .ok_or_else(|| WalletError::SigningFailed("degenerate lagrange denominator".to_string()))?;
    Ok(other_x * inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagrange_reconstructs_shared_secret() {
        // F(x) = secret + slope*x; two sample points reconstruct F(0).
        let secret = Scalar::from(12345u64);
        let slope = Scalar::from(777u64);
        let eval = |x: u64| secret + slope * Scalar::from(x);

        let x1 = Scalar::from(1u64);
        let x2 = Scalar::from(2u64);
        let s1 = eval(1);
        let s2 = eval(2);

        let l1 = lagrange_coefficient(x1, x2).unwrap();
        let l2 = lagrange_coefficient(x2, x1).unwrap();
        let reconstructed = s1 * l1 + s2 * l2;
        assert_eq!(reconstructed, secret);
    }
}
