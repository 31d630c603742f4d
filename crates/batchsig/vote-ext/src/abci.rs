//! Consensus-engine types and the wire codec of the injected extended commit

use alloy_primitives::{Address, Bytes};
use alloy_rlp::{BufMut, Decodable, Encodable, RlpDecodable, RlpEncodable};

use crate::VoteExtError;

/// How a validator voted for the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockIdFlag {
    /// Unset
    Unknown = 0,
    /// No vote received
    Absent = 1,
    /// Voted for the block
    Commit = 2,
    /// Voted nil
    Nil = 3,
}

impl Encodable for BlockIdFlag {
    fn encode(&self, out: &mut dyn BufMut) {
        (*self as u8).encode(out)
    }

    fn length(&self) -> usize {
        (*self as u8).length()
    }
}

impl Decodable for BlockIdFlag {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        match u8::decode(buf)? {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Absent),
            2 => Ok(Self::Commit),
            3 => Ok(Self::Nil),
            _ => Err(alloy_rlp::Error::Custom("unknown block id flag")),
        }
    }
}

/// Validator as it appears in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Validator {
    /// Consensus address
    pub address: Address,
    /// Voting power
    pub power: u64,
}

/// A vote of the last commit, without extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteInfo {
    /// Voter
    pub validator: Validator,
    /// How the voter voted
    pub block_id_flag: BlockIdFlag,
}

/// The last commit a proposal builds on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitInfo {
    /// Round the commit was reached in
    pub round: u32,
    /// One vote per validator of the set
    pub votes: Vec<VoteInfo>,
}

/// A vote of the extended commit.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct ExtendedVoteInfo {
    /// Voter
    pub validator: Validator,
    /// Vote extension (the batch signature)
    pub vote_extension: Bytes,
    /// Consensus-key signature over the canonical vote extension
    pub extension_signature: Bytes,
    /// How the voter voted
    pub block_id_flag: BlockIdFlag,
}

/// Extended commit of the previous height, injected as tx 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct ExtendedCommitInfo {
    /// Round the commit was reached in
    pub round: u32,
    /// Votes sorted by descending power then ascending address
    pub votes: Vec<ExtendedVoteInfo>,
}

impl ExtendedCommitInfo {
    /// The commit with extensions stripped
    pub fn to_commit_info(&self) -> CommitInfo {
        CommitInfo {
            round: self.round,
            votes: self
                .votes
                .iter()
                .map(|vote| VoteInfo { validator: vote.validator, block_id_flag: vote.block_id_flag })
                .collect(),
        }
    }

    /// Sort votes the way the consensus engine does.
    pub fn sort_votes(&mut self) {
        self.votes.sort_by(|a, b| {
            b.validator.power.cmp(&a.validator.power).then(a.validator.address.cmp(&b.validator.address))
        });
    }
}

/// Verdict on a single vote extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    /// Extension accepted
    Accept,
    /// Extension rejected
    Reject,
}

/// Verdict on a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    /// Proposal accepted
    Accept,
    /// Proposal rejected
    Reject,
}

/// RLP-encode an extended commit as a proposal transaction.
pub fn encode_extended_commit(commit: &ExtendedCommitInfo) -> Bytes {
    Bytes::from(alloy_rlp::encode(commit))
}

/// Decode the injected transaction, rejecting trailing bytes.
pub fn decode_extended_commit(tx: &[u8]) -> Result<ExtendedCommitInfo, VoteExtError> {
    let mut buf = tx;
    let commit = ExtendedCommitInfo::decode(&mut buf)?;
    if !buf.is_empty() {
        return Err(VoteExtError::TrailingBytes(buf.len()));
    }
    Ok(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn vote(byte: u8, power: u64, flag: BlockIdFlag) -> ExtendedVoteInfo {
        ExtendedVoteInfo {
            validator: Validator { address: Address::repeat_byte(byte), power },
            vote_extension: Bytes::from(vec![byte; 64]),
            extension_signature: Bytes::from(vec![byte; 64]),
            block_id_flag: flag,
        }
    }

    #[test]
    fn test_codec_roundtrip() {
        let commit = ExtendedCommitInfo {
            round: 2,
            votes: vec![vote(1, 10, BlockIdFlag::Commit), vote(2, 5, BlockIdFlag::Absent)],
        };
        let tx = encode_extended_commit(&commit);
        assert_eq!(decode_extended_commit(&tx).unwrap(), commit);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut tx = encode_extended_commit(&ExtendedCommitInfo::default()).to_vec();
        tx.push(0);
        assert_matches!(decode_extended_commit(&tx), Err(VoteExtError::TrailingBytes(1)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert_matches!(decode_extended_commit(b"not rlp"), Err(VoteExtError::Decode(_)));
        assert_matches!(decode_extended_commit(&[]), Err(VoteExtError::Decode(_)));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let mut buf = Vec::new();
        7u8.encode(&mut buf);
        assert!(BlockIdFlag::decode(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_sort_votes() {
        let mut commit = ExtendedCommitInfo {
            round: 0,
            votes: vec![vote(3, 5, BlockIdFlag::Commit), vote(2, 9, BlockIdFlag::Commit), vote(1, 5, BlockIdFlag::Nil)],
        };
        commit.sort_votes();
        let order: Vec<u8> = commit.votes.iter().map(|v| v.validator.address[0]).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }
}
