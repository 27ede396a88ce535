//! Authentication for agent connections
//!
//! Agents prove knowledge of the relay's shared secret with a short-lived
//! token derived from the tunnel id, the secret and a coarse time bucket.
//! No state is kept on either side: both peers recompute the digest.

pub mod token;

pub use token::{
    derive_token, generate_token, is_valid_token, parse_subprotocol_header, time_bucket, Clock,
    FixedClock, SystemClock, TokenAuthenticator, TokenError, TIME_SPAN_SECS, TOKEN_LEN,
};
