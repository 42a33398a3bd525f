//! Crate-wide error type.
//!
//! Mirrors the taxonomy in the design: header-format and ancestor errors are
//! fatal for a single header; authorization errors are fatal for a single
//! header but never for the engine; persistence and numeric-safety problems
//! are never propagated out of the subsystem that encounters them (they are
//! logged at the call site and the in-memory state stays authoritative).

use error_chain::error_chain;

error_chain! {
    errors {
        /// Malformed header fields: vanity, signature, checkpoint signer list,
        /// mix digest, uncle hash, difficulty, timestamp, vote.
        HeaderFormat(msg: String) {
            description("malformed consensus header")
            display("malformed header: {}", msg)
        }
        /// The parent or an earlier ancestor required to build a snapshot is
        /// missing from the headers the caller supplied.
        UnknownAncestor(hash: ethereum_types::H256) {
            description("unknown ancestor")
            display("unknown ancestor: {:#x}", hash)
        }
        /// A checkpoint block's signer list conflicts with locally tallied
        /// votes.
        MismatchingCheckpointSigners {
            description("mismatching signer list on checkpoint block")
            display("mismatching signer list on checkpoint block")
        }
        /// The recovered sealer is not authorized, or signed too recently.
        Unauthorized(addr: ethereum_types::Address) {
            description("unauthorized signer")
            display("unauthorized signer: {:#x}", addr)
        }
        RecentlySigned(addr: ethereum_types::Address) {
            description("recently signed")
            display("signer {:#x} is still inside the recent-signing window", addr)
        }
        /// Whitelist/blacklist gate rejected the signer.
        PolicyRejected(addr: ethereum_types::Address, reason: String) {
            description("policy rejected signer")
            display("signer {:#x} rejected by policy: {}", addr, reason)
        }
        /// No validators are registered with the selection manager.
        NoActiveValidators {
            description("no active validators")
            display("no active validators available for committee selection")
        }
        /// Local signer is not currently authorized to seal.
        NotASigner {
            description("local signer not authorized")
            display("local account is not in the current authorized signer set")
        }
    }
}
