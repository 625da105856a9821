use std::{fmt, io};

use flate2::{CompressError, DecompressError, FlushCompress, FlushDecompress, Status};
use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, space0},
    combinator::{all_consuming, map, opt},
    multi::many0,
    sequence::{delimited, preceded},
    IResult, Parser,
};

use crate::CompressionLevel;

pub(crate) const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

pub(crate) const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
pub(crate) const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
pub(crate) const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
pub(crate) const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

/// Smallest LZ77 window size a peer may ask for.
pub(crate) const MIN_WINDOW_BITS: u8 = 8;
/// Largest LZ77 window size a peer may ask for.
pub(crate) const MAX_WINDOW_BITS: u8 = 15;

/// Tail of a sync flush, removed from outgoing messages and restored before inflating.
pub(crate) const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Value of a `client_max_window_bits` parameter, which may be offered without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBits {
    /// The client supports the parameter but lets the server pick the size.
    NoValue,
    /// An explicit window size in `8..=15`.
    Value(u8),
}

/// The permessage-deflate parameters offered by a client.
///
/// Each parameter may be offered at most once. An offer repeating a parameter, carrying a
/// parameter unknown to RFC 7692, or a window size outside of `8..=15` is rejected as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeflateOffer {
    pub client_no_context_takeover: bool,
    pub client_max_window_bits: Option<WindowBits>,
    pub server_no_context_takeover: bool,
    pub server_max_window_bits: Option<u8>,
}

impl DeflateOffer {
    /// Builds an offer from its `name[=value]` parameters.
    ///
    /// Parameter names are matched case-insensitively.
    pub fn from_params<'a>(
        params: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> Result<Self, String> {
        let mut offer = Self::default();

        for (name, value) in params {
            let name = name.to_ascii_lowercase();
            match name.as_str() {
                CLIENT_NO_CONTEXT_TAKEOVER => {
                    if offer.client_no_context_takeover {
                        return Err(duplicate(&name));
                    }
                    offer.client_no_context_takeover = true;
                }
                SERVER_NO_CONTEXT_TAKEOVER => {
                    if offer.server_no_context_takeover {
                        return Err(duplicate(&name));
                    }
                    offer.server_no_context_takeover = true;
                }
                CLIENT_MAX_WINDOW_BITS => {
                    if offer.client_max_window_bits.is_some() {
                        return Err(duplicate(&name));
                    }
                    offer.client_max_window_bits = Some(match value {
                        Some(value) => WindowBits::Value(parse_window_bits(&name, value)?),
                        None => WindowBits::NoValue,
                    });
                }
                SERVER_MAX_WINDOW_BITS => {
                    if offer.server_max_window_bits.is_some() {
                        return Err(duplicate(&name));
                    }
                    let value = value.unwrap_or_default();
                    offer.server_max_window_bits = Some(parse_window_bits(&name, value)?);
                }
                _ => return Err(format!("unknown parameter {name}")),
            }
        }

        Ok(offer)
    }
}

fn duplicate(name: &str) -> String {
    format!("duplicate parameter {name}")
}

fn parse_window_bits(name: &str, value: &str) -> Result<u8, String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{name} is not a number: {value:?}"));
    }

    value
        .parse::<u8>()
        .ok()
        .filter(|bits| (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(bits))
        .ok_or_else(|| format!("{name} out of range: {value}"))
}

impl fmt::Display for DeflateOffer {
    /// Formats the offer the way it appears in a `Sec-WebSocket-Extensions` header.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PERMESSAGE_DEFLATE}")?;

        if self.client_no_context_takeover {
            write!(f, "; {CLIENT_NO_CONTEXT_TAKEOVER}")?;
        }
        match self.client_max_window_bits {
            Some(WindowBits::Value(bits)) => write!(f, "; {CLIENT_MAX_WINDOW_BITS}={bits}")?,
            Some(WindowBits::NoValue) => write!(f, "; {CLIENT_MAX_WINDOW_BITS}")?,
            None => {}
        }
        if self.server_no_context_takeover {
            write!(f, "; {SERVER_NO_CONTEXT_TAKEOVER}")?;
        }
        if let Some(bits) = self.server_max_window_bits {
            write!(f, "; {SERVER_MAX_WINDOW_BITS}={bits}")?;
        }

        Ok(())
    }
}

impl std::str::FromStr for DeflateOffer {
    type Err = String;

    /// Parses a single `permessage-deflate; ...` element of an extensions header.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let extension =
            parse_extension(input).ok_or_else(|| format!("malformed extension: {input:?}"))?;
        if !extension.name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE) {
            return Err(format!("not {PERMESSAGE_DEFLATE}: {}", extension.name));
        }
        Self::from_params(extension.params)
    }
}

/// One element of a `Sec-WebSocket-Extensions` header: a name and its parameters.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Extension<'a> {
    pub name: &'a str,
    pub params: Vec<(&'a str, Option<&'a str>)>,
}

/// Parses `name *( ";" param [ "=" ( token | quoted-string ) ] )`.
///
/// Returns `None` if anything is left over once the element has been parsed.
pub(crate) fn parse_extension(input: &str) -> Option<Extension<'_>> {
    all_consuming(extension)
        .parse(input)
        .ok()
        .map(|(_, extension)| extension)
}

fn extension(input: &str) -> IResult<&str, Extension<'_>> {
    map(
        delimited(space0, (token, many0(param)), space0),
        |(name, params)| Extension { name, params },
    )
    .parse(input)
}

fn param(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    // ; client_max_window_bits=10
    preceded(
        (space0, char(';'), space0),
        (
            token,
            opt(preceded((space0, char('='), space0), alt((token, quoted)))),
        ),
    )
    .parse(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)).parse(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"')).parse(input)
}

/// A raw deflate compressor for outgoing messages.
///
/// The compressor is reset before every message, so no window is shared between messages.
pub(crate) struct Deflate {
    compress: flate2::Compress,
}

impl Deflate {
    pub fn new(level: CompressionLevel) -> Self {
        Self {
            compress: flate2::Compress::new(level, false),
        }
    }

    /// Compresses a whole message and strips the trailing `00 00 ff ff` of the sync flush.
    pub fn compress(&mut self, mut input: &[u8]) -> io::Result<Vec<u8>> {
        self.compress.reset();

        let mut output = Vec::with_capacity(input.len() / 2 + 64);

        while !input.is_empty() {
            reserve(&mut output);

            let before_out = self.compress.total_out();
            let before_in = self.compress.total_in();

            self.compress
                .compress_vec(input, &mut output, FlushCompress::None)
                .map_err(deflate_error)?;

            let consumed = (self.compress.total_in() - before_in) as usize;
            if consumed == 0 && before_out == self.compress.total_out() {
                return Err(corrupt());
            }
            input = &input[consumed..];
        }

        reserve(&mut output);
        self.compress
            .compress_vec(&[], &mut output, FlushCompress::Sync)
            .map_err(deflate_error)?;

        // drain whatever did not fit in the output
        loop {
            reserve(&mut output);

            let before_out = self.compress.total_out();
            self.compress
                .compress_vec(&[], &mut output, FlushCompress::None)
                .map_err(deflate_error)?;

            if before_out == self.compress.total_out() {
                break;
            }
        }

        if output.ends_with(&DEFLATE_TRAILER) {
            output.truncate(output.len() - DEFLATE_TRAILER.len());
        }

        Ok(output)
    }
}

/// A raw deflate decompressor for incoming messages.
///
/// Clients are always asked not to take over their context, so every message is inflated
/// from a fresh state.
pub(crate) struct Inflate {
    decompress: flate2::Decompress,
}

impl Default for Inflate {
    fn default() -> Self {
        Self {
            decompress: flate2::Decompress::new(false),
        }
    }
}

impl Inflate {
    /// Inflates a whole message once the `00 00 ff ff` tail has been restored.
    pub fn decompress(&mut self, payload: &[u8]) -> io::Result<Vec<u8>> {
        self.decompress.reset(false);

        let mut output = Vec::with_capacity(payload.len().saturating_mul(2).max(64));

        for mut input in [payload, &DEFLATE_TRAILER[..]] {
            while !input.is_empty() {
                reserve(&mut output);

                let before_out = self.decompress.total_out();
                let before_in = self.decompress.total_in();

                let status = self
                    .decompress
                    .decompress_vec(input, &mut output, FlushDecompress::None)
                    .map_err(inflate_error)?;

                let consumed = (self.decompress.total_in() - before_in) as usize;
                let produced = self.decompress.total_out() - before_out;
                input = &input[consumed..];

                match status {
                    // the last block had BFINAL set, anything after it is ignored
                    Status::StreamEnd => return Ok(output),
                    _ if consumed == 0 && produced == 0 => return Err(corrupt()),
                    _ => {}
                }
            }
        }

        loop {
            reserve(&mut output);

            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(&[], &mut output, FlushDecompress::Sync)
                .map_err(inflate_error)?;

            if status == Status::StreamEnd || before_out == self.decompress.total_out() {
                break Ok(output);
            }
        }
    }
}

/// Makes sure flate2 has room to write into.
fn reserve(output: &mut Vec<u8>) {
    if output.len() == output.capacity() {
        output.reserve(1024);
    }
}

fn corrupt() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "corrupt deflate stream")
}

/// ignore the mapping input and print out a specific error.
fn deflate_error(err: CompressError) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Compression error: {}", err),
    )
}

fn inflate_error(err: DecompressError) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Decompression error: {}", err),
    )
}
