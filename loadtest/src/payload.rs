//! Request bodies for the agreement generation endpoint.
//!
//! Every iteration draws a landlord number `N` uniformly from `1..=1000` and builds an
//! [`AgreementRequest`] in which the same landlord acts as tenant, landlord and caller.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// The number of distinct landlords requests are spread over.
pub const LANDLORD_COUNT: u32 = 1000;

/// The housing every generated agreement refers to.
pub const HOUSING_ID: &str = "housing1";

/// Body of a `POST /agreement/generate` request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AgreementRequest {
    /// The tenant party, `landlordN`.
    pub tenant_id: String,
    /// The landlord party, `landlordN`.
    pub landlord_id: String,
    /// Always [`HOUSING_ID`].
    pub housing_id: String,
    /// The calling user, sent as `_uid`.
    #[serde(rename = "_uid")]
    pub uid: String,
}

impl AgreementRequest {
    /// Builds the request for landlord number `n`.
    pub fn for_landlord(n: u32) -> Self {
        let landlord = format!("landlord{n}");
        Self {
            tenant_id: landlord.clone(),
            landlord_id: landlord.clone(),
            housing_id: HOUSING_ID.to_owned(),
            uid: landlord,
        }
    }

    /// Serializes the request into its JSON wire format.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Produces a fresh [`AgreementRequest`] per iteration.
///
/// Each virtual user owns its generator, so no state is shared between users.
#[derive(Debug)]
pub struct PayloadGenerator {
    rng: SmallRng,
}

impl PayloadGenerator {
    /// Creates a generator with a deterministic sequence for the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Draws the next landlord number in `1..=LANDLORD_COUNT`.
    pub fn next_landlord(&mut self) -> u32 {
        self.rng.random_range(1..=LANDLORD_COUNT)
    }

    /// Builds the request for the next iteration.
    pub fn next_request(&mut self) -> AgreementRequest {
        AgreementRequest::for_landlord(self.next_landlord())
    }
}
