use crate::{
    compression::{parse_extension, DeflateOffer, PERMESSAGE_DEFLATE},
    DeflateProvider, IdentityProvider, Options, Provider,
};

/// Outcome of the permessage-deflate negotiation.
///
/// Holds the provider messages go through and, when compression was accepted, the value the
/// handshake returns in its `Sec-WebSocket-Extensions` response header.
pub struct Negotiation {
    provider: Provider,
    header: Option<String>,
}

impl Negotiation {
    /// The provider messages are sent and received with.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Consumes the negotiation, keeping only the provider.
    pub fn into_provider(self) -> Provider {
        self.provider
    }

    /// Value of the `Sec-WebSocket-Extensions` response header, `None` when nothing was accepted.
    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Negotiates from the `Sec-WebSocket-Extensions` headers of an upgrade request.
    #[cfg(feature = "http")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http")))]
    pub fn from_headers(headers: &http::HeaderMap, options: &Options) -> Self {
        let offers = headers
            .get_all(http::header::SEC_WEBSOCKET_EXTENSIONS)
            .iter()
            .filter_map(|value| value.to_str().ok());

        negotiate(offers, options)
    }

    /// Adds the `Sec-WebSocket-Extensions` header to an upgrade response.
    #[cfg(feature = "http")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http")))]
    pub fn apply(&self, headers: &mut http::HeaderMap) {
        let Some(header) = self.header() else {
            return;
        };

        if let Ok(value) = http::HeaderValue::from_str(header) {
            headers.insert(http::header::SEC_WEBSOCKET_EXTENSIONS, value);
        }
    }
}

/// Picks the compression provider for the extensions offered by a client.
///
/// `offers` are the values of the `Sec-WebSocket-Extensions` request headers. Each value may list
/// several extensions separated by commas; malformed elements are skipped. Only the first
/// `permessage-deflate` element is considered: if its parameters are invalid, or the deflate
/// provider refuses them, messages are sent uncompressed.
///
/// # Example
/// ```rust
/// use wscompress::{negotiate, Options};
///
/// let negotiation = negotiate(
///     ["permessage-deflate; client_max_window_bits"],
///     &Options::default(),
/// );
/// assert!(negotiation.provider().is_compressed());
/// assert_eq!(
///     negotiation.header(),
///     Some("permessage-deflate; client_no_context_takeover")
/// );
/// ```
pub fn negotiate<'a>(offers: impl IntoIterator<Item = &'a str>, options: &Options) -> Negotiation {
    let provider = offers
        .into_iter()
        .flat_map(|value| value.split(','))
        .filter_map(parse_extension)
        .find(|extension| extension.name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
        .and_then(|extension| match DeflateOffer::from_params(extension.params) {
            Ok(offer) => DeflateProvider::new(offer, options),
            Err(_reason) => {
                #[cfg(feature = "logging")]
                log::debug!("invalid {PERMESSAGE_DEFLATE} offer: {_reason}");
                None
            }
        });

    match provider {
        Some(deflate) => {
            let header = deflate.response_header();

            #[cfg(feature = "logging")]
            log::debug!("negotiated {header}");

            Negotiation {
                provider: Provider::Deflate(deflate),
                header: Some(header),
            }
        }
        None => Negotiation {
            provider: Provider::Identity(IdentityProvider::new(options)),
            header: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(offers: &[&str]) -> Negotiation {
        negotiate(offers.iter().copied(), &Options::default())
    }

    #[test]
    fn test_no_offer() {
        let negotiation = negotiated(&[]);
        assert!(!negotiation.provider().is_compressed());
        assert_eq!(negotiation.header(), None);

        let negotiation = negotiated(&["x-webkit-deflate-frame"]);
        assert!(!negotiation.provider().is_compressed());
    }

    #[test]
    fn test_server_max_window_bits_falls_back() {
        let negotiation = negotiated(&["permessage-deflate; server_max_window_bits=10"]);
        assert!(!negotiation.provider().is_compressed());
        assert_eq!(negotiation.header(), None);
    }

    #[test]
    fn test_client_max_window_bits_not_answered() {
        let negotiation =
            negotiated(&["permessage-deflate; client_max_window_bits=10; client_no_context_takeover"]);
        assert!(negotiation.provider().is_compressed());

        let header = negotiation.header().unwrap();
        assert_eq!(header, "permessage-deflate; client_no_context_takeover");
        assert!(!header.contains("client_max_window_bits"));
    }

    #[test]
    fn test_server_no_context_takeover_echoed() {
        let negotiation = negotiated(&["permessage-deflate; Server_No_Context_Takeover"]);
        assert_eq!(
            negotiation.header(),
            Some("permessage-deflate; client_no_context_takeover; server_no_context_takeover")
        );
    }

    #[test]
    fn test_invalid_offers_fall_back() {
        for offer in [
            "permessage-deflate; client_no_context_takeover; client_no_context_takeover",
            "permessage-deflate; foo",
            "permessage-deflate; client_max_window_bits=7",
            "permessage-deflate; client_max_window_bits=16",
            "permessage-deflate; client_max_window_bits=ten",
        ] {
            let negotiation = negotiated(&[offer]);
            assert!(!negotiation.provider().is_compressed(), "{offer}");
        }
    }

    #[test]
    fn test_first_deflate_element_wins() {
        let negotiation = negotiated(&[
            "foo; bar",
            "permessage-deflate; server_max_window_bits=10, permessage-deflate",
        ]);
        assert!(!negotiation.provider().is_compressed());

        let negotiation = negotiated(&["permessage-deflate; \"broken, permessage-deflate"]);
        assert!(negotiation.provider().is_compressed());
    }

    #[test]
    fn test_quoted_values() {
        let negotiation = negotiated(&["permessage-deflate; client_max_window_bits=\"12\""]);
        assert!(negotiation.provider().is_compressed());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_headers() {
        use http::{header::SEC_WEBSOCKET_EXTENSIONS, HeaderMap, HeaderValue};

        let mut request = HeaderMap::new();
        request.append(SEC_WEBSOCKET_EXTENSIONS, HeaderValue::from_static("foo"));
        request.append(
            SEC_WEBSOCKET_EXTENSIONS,
            HeaderValue::from_static("permessage-deflate; server_no_context_takeover"),
        );

        let negotiation = Negotiation::from_headers(&request, &Options::default());
        let mut response = HeaderMap::new();
        negotiation.apply(&mut response);

        assert_eq!(
            response.get(SEC_WEBSOCKET_EXTENSIONS).unwrap(),
            "permessage-deflate; client_no_context_takeover; server_no_context_takeover"
        );
    }
}
