use ethers::abi::{self, ParamType, Token};
use ethers::providers::{ProviderError, RpcError};

/// Selector of the Solidity `Error(string)` revert encoding.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Decode the human-readable require/revert string out of an ABI-encoded
/// revert payload. Returns `None` when the payload does not match the
/// `Error(string)` encoding; a non-matching payload never decodes to an empty
/// string.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let tokens = abi::decode(&[ParamType::String], &data[4..]).ok()?;
    match tokens.into_iter().next() {
        Some(Token::String(reason)) => Some(reason),
        _ => None,
    }
}

/// Dig a revert reason out of a JSON-RPC error response, if the error carries
/// one. Nodes surface revert payloads either as a hex `data` field or as an
/// `execution reverted: …` message.
pub fn revert_reason(err: &ProviderError) -> Option<String> {
    let resp = err.as_error_response()?;
    if let Some(data) = resp.data.as_ref().and_then(|d| d.as_str()) {
        if let Ok(raw) = hex::decode(data.trim_start_matches("0x")) {
            if let Some(reason) = decode_revert(&raw) {
                return Some(reason);
            }
        }
    }
    resp.message
        .strip_prefix("execution reverted: ")
        .map(str::to_owned)
}

/// Encode a reason string the way Solidity's `revert(reason)` does.
/// Counterpart of [`decode_revert`], used by tests and mock nodes.
pub fn encode_revert(reason: &str) -> Vec<u8> {
    let mut out = ERROR_STRING_SELECTOR.to_vec();
    out.extend(abi::encode(&[Token::String(reason.to_owned())]));
    out
}
