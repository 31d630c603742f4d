use std::collections::HashSet;

use batchsig_primitives::{crypto::verify_consensus_signature, StakingKeeper};
use tracing::{debug, trace};

use crate::{
    abci::{BlockIdFlag, CommitInfo, ExtendedCommitInfo, ExtendedVoteInfo, Validator},
    vote_extension_sign_bytes, VoteExtError,
};

/// `floor(total * 2 / 3) + 1`
pub const fn required_voting_power(total: u128) -> u128 {
    total * 2 / 3 + 1
}

/// `prev` precedes `next` in commit order: descending power, then
/// ascending address.
fn in_commit_order(prev: &Validator, next: &Validator) -> bool {
    prev.power > next.power || (prev.power == next.power && prev.address < next.address)
}

/// An absent vote with nothing attached may have been dropped by the
/// proposer, so its flag is not compared.
fn is_pruned_absent(vote: &ExtendedVoteInfo) -> bool {
    vote.block_id_flag == BlockIdFlag::Absent &&
        vote.vote_extension.is_empty() &&
        vote.extension_signature.is_empty()
}

/// Cross-validate an extended commit for `height` against the last commit
/// it extends.
///
/// Extension signatures are checked against the canonical payload of
/// `height - 1`, the height the votes were cast at.
pub fn validate_vote_extensions<K: StakingKeeper>(
    staking: &K,
    chain_id: &str,
    height: i64,
    extended: &ExtendedCommitInfo,
    last: &CommitInfo,
) -> Result<(), VoteExtError> {
    if extended.round != last.round {
        return Err(VoteExtError::RoundMismatch { extended: extended.round, last: last.round });
    }
    if extended.votes.len() != last.votes.len() {
        return Err(VoteExtError::VoteCountMismatch {
            extended: extended.votes.len(),
            last: last.votes.len(),
        });
    }

    let mut seen = HashSet::with_capacity(extended.votes.len());
    let mut total_power: u128 = 0;
    let mut commit_power: u128 = 0;

    for (index, (vote, last_vote)) in extended.votes.iter().zip(&last.votes).enumerate() {
        let address = vote.validator.address;
        if !seen.insert(address) {
            return Err(VoteExtError::DuplicateVote(address));
        }
        if index > 0 && !in_commit_order(&extended.votes[index - 1].validator, &vote.validator) {
            return Err(VoteExtError::VotesNotSorted { index });
        }
        if vote.validator != last_vote.validator ||
            (!is_pruned_absent(vote) && vote.block_id_flag != last_vote.block_id_flag)
        {
            return Err(VoteExtError::VoteMismatch { index, validator: address });
        }

        total_power += u128::from(vote.validator.power);

        if vote.block_id_flag != BlockIdFlag::Commit {
            if !vote.vote_extension.is_empty() || !vote.extension_signature.is_empty() {
                return Err(VoteExtError::NonCommitExtension(address));
            }
            continue;
        }

        let info = staking.validator_by_cons_addr(&address)?.ok_or(VoteExtError::UnknownValidator(address))?;
        let sign_bytes = vote_extension_sign_bytes(&vote.vote_extension, height - 1, extended.round, chain_id);
        verify_consensus_signature(&info.consensus_pubkey, &sign_bytes, &vote.extension_signature)
            .map_err(|source| VoteExtError::InvalidExtensionSignature { validator: address, source })?;

        trace!(target: "batchsig::vote_ext", validator = %address, power = vote.validator.power, "Valid commit vote");
        commit_power += u128::from(vote.validator.power);
    }

    let required = required_voting_power(total_power);
    if commit_power < required {
        return Err(VoteExtError::InsufficientVotingPower { got: commit_power, required });
    }

    debug!(
        target: "batchsig::vote_ext",
        height,
        votes = extended.votes.len(),
        commit_power = %commit_power,
        total_power = %total_power,
        "Validated extended commit"
    );
    Ok(())
}
