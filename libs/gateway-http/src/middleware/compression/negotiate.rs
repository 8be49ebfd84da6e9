//! `Accept-Encoding` negotiation.

/// Supported response encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Gzip,
    Deflate,
    Brotli,
}

impl Algorithm {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "br" => Some(Self::Brotli),
            _ => None,
        }
    }

    /// Server preference on quality ties: gzip over br over deflate.
    fn preference(self) -> u8 {
        match self {
            Self::Gzip => 0,
            Self::Brotli => 1,
            Self::Deflate => 2,
        }
    }
}

/// Outcome of negotiating the request's `Accept-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// No header: the response is sent as-is.
    NoHeader,
    /// Header present but no supported encoding selected; identity is fine.
    Identity,
    /// The client refuses identity and accepts nothing we support.
    NotAcceptable,
    Encode(Algorithm),
}

/// Parse an `Accept-Encoding` value into `(token, qvalue)` pairs.
///
/// The qvalue defaults to 1.0 when absent; malformed qvalues read as 1.0.
/// Tokens are lowercased.
#[must_use]
pub fn parse_accept_encoding(value: &str) -> Vec<(String, f32)> {
    value
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let token = parts.next()?.trim().to_ascii_lowercase();
            if token.is_empty() {
                return None;
            }

            let q = parts
                .find_map(|p| p.trim().strip_prefix("q=").map(str::to_owned))
                .and_then(|q| q.parse::<f32>().ok())
                .filter(|q| q.is_finite() && *q >= 0.0)
                .unwrap_or(1.0);

            Some((token, q))
        })
        .collect()
}

#[must_use]
pub fn negotiate(header: Option<&str>) -> Negotiation {
    let Some(raw) = header else {
        return Negotiation::NoHeader;
    };

    let pairs = parse_accept_encoding(raw);
    if pairs.is_empty() {
        return Negotiation::NoHeader;
    }

    let q_of = |token: &str| -> Option<f32> {
        pairs
            .iter()
            .rev()
            .find_map(|(t, q)| (t == token).then_some(*q))
    };

    let star = q_of("*");

    // Effective quality per supported algorithm; `*` stands in for gzip when
    // gzip is not named explicitly.
    let mut candidates: Vec<(Algorithm, f32)> = Vec::with_capacity(3);
    for algo in [Algorithm::Gzip, Algorithm::Deflate, Algorithm::Brotli] {
        let q = match q_of(algo.token()) {
            Some(q) => Some(q),
            None if algo == Algorithm::Gzip => star,
            None => None,
        };
        if let Some(q) = q
            && q > 0.0
        {
            candidates.push((algo, q));
        }
    }

    if let Some(best) = candidates.iter().copied().min_by(|(a, qa), (b, qb)| {
        qb.partial_cmp(qa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.preference().cmp(&b.preference()))
    }) {
        return Negotiation::Encode(best.0);
    }

    // Nothing we support is acceptable; is identity still allowed?
    let identity_forbidden =
        q_of("identity") == Some(0.0) || (star == Some(0.0) && q_of("identity").is_none());
    if identity_forbidden {
        Negotiation::NotAcceptable
    } else {
        Negotiation::Identity
    }
}
