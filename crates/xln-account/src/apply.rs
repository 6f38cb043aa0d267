use ethnum::I256;
use tracing::{debug, warn};

use xln_core::constants::MIN_TIMELOCK_DELTA_MS;
use xln_core::{
    AccountInput, AccountTx, HtlcLock, JHeight, OnionEnvelope, Timestamp, XlnError,
};
use xln_crypto::{hashlock_of, peel_envelope};

use crate::capacity::derive;
use crate::htlc::forward_amount;
use crate::machine::{AccountCtx, AccountEffect, AccountMachine};

impl AccountMachine {
    /// Apply one account tx to the position. Called identically on both
    /// sides (dry-run, peer-frame commit, own-frame commit on ACK), so every
    /// check in here must be a pure function of state + tx + frame fields.
    ///
    /// Effects are viewpoint-filtered: only the side the effect concerns
    /// emits it.
    pub(crate) fn apply_tx(
        &mut self,
        tx: &AccountTx,
        j_height: JHeight,
        _now: Timestamp,
        ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        match tx {
            AccountTx::DirectPayment { token_id, amount, sender_is_left } => {
                self.apply_direct_payment(*token_id, *amount, *sender_is_left)
            }
            AccountTx::SetCreditLimit { token_id, amount, creditor_is_left } => {
                self.apply_set_credit_limit(*token_id, *amount, *creditor_is_left)
            }
            AccountTx::CreateLock { lock } => self.apply_create_lock(lock, j_height, ctx),
            AccountTx::SettleLock { lock_id, secret } => {
                let lock_id = *lock_id;
                let secret = *secret;
                let lock = self
                    .locks
                    .get(&lock_id)
                    .cloned()
                    .ok_or(XlnError::UnknownLock { lock_id: lock_id.to_hex() })?;
                if hashlock_of(&secret) != lock.hashlock {
                    return Err(XlnError::FinancialSafety {
                        check: "HASHLOCK_MISMATCH",
                        detail: format!("lock {lock_id}"),
                    });
                }

                // Pay the receiver and release the sender's hold.
                let delta = self.delta_mut(lock.token_id);
                if lock.sender_is_left {
                    delta.offdelta -= lock.amount;
                    delta.left_htlc_hold -= lock.amount;
                } else {
                    delta.offdelta += lock.amount;
                    delta.right_htlc_hold -= lock.amount;
                }
                self.locks.remove(&lock_id);

                let mut effects = vec![AccountEffect::SecretLearned {
                    hashlock: lock.hashlock,
                    secret,
                }];
                if lock.sender_is_left != self.owner_is_left {
                    effects.push(AccountEffect::PaymentReceived {
                        token_id: lock.token_id,
                        amount: lock.amount,
                    });
                }
                Ok(effects)
            }
            AccountTx::CancelLock { lock_id, reason } => {
                let lock = self
                    .locks
                    .remove(lock_id)
                    .ok_or(XlnError::UnknownLock { lock_id: lock_id.to_hex() })?;
                debug!(account = %self.peer(), lock = %lock_id, %reason, "lock cancelled");
                let delta = self.delta_mut(lock.token_id);
                if lock.sender_is_left {
                    delta.left_htlc_hold -= lock.amount;
                } else {
                    delta.right_htlc_hold -= lock.amount;
                }
                Ok(Vec::new())
            }
            AccountTx::SwapOffer { offer } => {
                if offer.give_amount <= I256::ZERO || offer.take_amount <= I256::ZERO {
                    return Err(XlnError::FinancialSafety {
                        check: "AMOUNT_NOT_POSITIVE",
                        detail: format!("swap offer {}", offer.offer_id),
                    });
                }
                if offer.filled_give != I256::ZERO {
                    return Err(XlnError::FinancialSafety {
                        check: "SWAP_PREFILLED",
                        detail: format!("swap offer {}", offer.offer_id),
                    });
                }
                if self.swap_offers.contains_key(&offer.offer_id) {
                    return Err(XlnError::FinancialSafety {
                        check: "DUPLICATE_OFFER",
                        detail: offer.offer_id.to_hex(),
                    });
                }
                let capacity = derive(self.delta_mut(offer.give_token), offer.owner_is_left)
                    .out_capacity;
                if capacity < offer.give_amount {
                    return Err(XlnError::FinancialSafety {
                        check: "INSUFFICIENT_CAPACITY",
                        detail: format!("swap give {} > capacity {capacity}", offer.give_amount),
                    });
                }
                let delta = self.delta_mut(offer.give_token);
                if offer.owner_is_left {
                    delta.left_swap_hold += offer.give_amount;
                } else {
                    delta.right_swap_hold += offer.give_amount;
                }
                self.swap_offers.insert(offer.offer_id, offer.clone());
                Ok(Vec::new())
            }
            AccountTx::SwapResolve { offer_id, fill_give, fill_take } => {
                let offer = self
                    .swap_offers
                    .get(offer_id)
                    .cloned()
                    .ok_or(XlnError::UnknownLock { lock_id: offer_id.to_hex() })?;
                if *fill_give <= I256::ZERO || *fill_give > offer.remaining_give() {
                    return Err(XlnError::FinancialSafety {
                        check: "SWAP_OVERFILL",
                        detail: format!("fill {fill_give} of {}", offer.remaining_give()),
                    });
                }
                if !offer.fill_is_fair(*fill_give, *fill_take) {
                    return Err(XlnError::FinancialSafety {
                        check: "SWAP_PRICE",
                        detail: format!("fill {fill_take}/{fill_give} below offer price"),
                    });
                }
                let resolver_is_left = !offer.owner_is_left;
                let take_capacity =
                    derive(self.delta_mut(offer.take_token), resolver_is_left).out_capacity;
                if take_capacity < *fill_take {
                    return Err(XlnError::FinancialSafety {
                        check: "INSUFFICIENT_CAPACITY",
                        detail: format!("swap take {fill_take} > capacity {take_capacity}"),
                    });
                }

                // Owner pays the give side (hold released), resolver the take.
                let give_delta = self.delta_mut(offer.give_token);
                if offer.owner_is_left {
                    give_delta.left_swap_hold -= *fill_give;
                    give_delta.offdelta -= *fill_give;
                } else {
                    give_delta.right_swap_hold -= *fill_give;
                    give_delta.offdelta += *fill_give;
                }
                let take_delta = self.delta_mut(offer.take_token);
                if resolver_is_left {
                    take_delta.offdelta -= *fill_take;
                } else {
                    take_delta.offdelta += *fill_take;
                }

                let entry = self.swap_offers.get_mut(offer_id).expect("checked above");
                entry.filled_give += *fill_give;
                if entry.remaining_give() <= I256::ZERO {
                    self.swap_offers.remove(offer_id);
                }
                Ok(Vec::new())
            }
            AccountTx::SwapCancel { offer_id } => {
                let offer = self
                    .swap_offers
                    .remove(offer_id)
                    .ok_or(XlnError::UnknownLock { lock_id: offer_id.to_hex() })?;
                let remaining = offer.remaining_give();
                let delta = self.delta_mut(offer.give_token);
                if offer.owner_is_left {
                    delta.left_swap_hold -= remaining;
                } else {
                    delta.right_swap_hold -= remaining;
                }
                Ok(Vec::new())
            }
        }
    }

    fn apply_direct_payment(
        &mut self,
        token_id: u32,
        amount: I256,
        sender_is_left: bool,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        if amount <= I256::ZERO {
            return Err(XlnError::FinancialSafety {
                check: "AMOUNT_NOT_POSITIVE",
                detail: amount.to_string(),
            });
        }
        let capacity = derive(self.delta_mut(token_id), sender_is_left).out_capacity;
        if capacity < amount {
            return Err(XlnError::FinancialSafety {
                check: "INSUFFICIENT_CAPACITY",
                detail: format!("payment {amount} > capacity {capacity}"),
            });
        }
        let delta = self.delta_mut(token_id);
        if sender_is_left {
            delta.offdelta -= amount;
        } else {
            delta.offdelta += amount;
        }
        if sender_is_left != self.owner_is_left {
            Ok(vec![AccountEffect::PaymentReceived { token_id, amount }])
        } else {
            Ok(Vec::new())
        }
    }

    fn apply_set_credit_limit(
        &mut self,
        token_id: u32,
        amount: I256,
        creditor_is_left: bool,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        if amount < I256::ZERO {
            return Err(XlnError::FinancialSafety {
                check: "NEGATIVE_CREDIT_LIMIT",
                detail: amount.to_string(),
            });
        }
        let delta = self.delta_mut(token_id);
        // The creditor bears the peer's debt, so it owns the peer's limit.
        if creditor_is_left {
            delta.right_credit_limit = amount;
        } else {
            delta.left_credit_limit = amount;
        }
        Ok(Vec::new())
    }

    fn apply_create_lock(
        &mut self,
        lock: &HtlcLock,
        j_height: JHeight,
        ctx: &AccountCtx<'_>,
    ) -> Result<Vec<AccountEffect>, XlnError> {
        if lock.amount < I256::ONE {
            return Err(XlnError::FinancialSafety {
                check: "AMOUNT_NOT_POSITIVE",
                detail: lock.amount.to_string(),
            });
        }
        if self.locks.contains_key(&lock.lock_id) {
            return Err(XlnError::FinancialSafety {
                check: "DUPLICATE_LOCK",
                detail: lock.lock_id.to_hex(),
            });
        }
        if lock.is_expired(j_height) {
            return Err(XlnError::LockExpired {
                lock_id: lock.lock_id.to_hex(),
                reveal_before: lock.reveal_before_height,
            });
        }
        let capacity = derive(self.delta_mut(lock.token_id), lock.sender_is_left).out_capacity;
        if capacity < lock.amount {
            return Err(XlnError::FinancialSafety {
                check: "INSUFFICIENT_CAPACITY",
                detail: format!("lock {} > capacity {capacity}", lock.amount),
            });
        }

        let delta = self.delta_mut(lock.token_id);
        if lock.sender_is_left {
            delta.left_htlc_hold += lock.amount;
        } else {
            delta.right_htlc_hold += lock.amount;
        }
        self.locks.insert(lock.lock_id, lock.clone());

        // Receiver side: peel our onion layer and decide what comes next.
        if lock.sender_is_left == self.owner_is_left {
            return Ok(Vec::new());
        }
        Ok(self.receive_lock_effects(lock, ctx))
    }

    /// What the receiving side of a fresh lock does with its onion layer.
    /// Failures here never fail the frame; the lock simply bounces back
    /// with an `HtlcCancel`.
    fn receive_lock_effects(&self, lock: &HtlcLock, ctx: &AccountCtx<'_>) -> Vec<AccountEffect> {
        let payload = match &lock.inner_envelope {
            OnionEnvelope::Cleartext { payload } => {
                if ctx.require_sealed_onions {
                    warn!(lock = %lock.lock_id, "cleartext onion refused, bouncing lock");
                    return vec![AccountEffect::SendToPeer(AccountInput::HtlcCancel {
                        lock_id: lock.lock_id,
                        reason: "cleartext envelope refused".to_string(),
                    })];
                }
                warn!(
                    account = %self.peer(),
                    lock = %lock.lock_id,
                    "cleartext onion envelope accepted (local setup)"
                );
                payload.clone()
            }
            sealed @ OnionEnvelope::Sealed { .. } => {
                let Some(encryption) = ctx.encryption else {
                    warn!(lock = %lock.lock_id, "no encryption key registered, bouncing lock");
                    return vec![AccountEffect::SendToPeer(AccountInput::HtlcCancel {
                        lock_id: lock.lock_id,
                        reason: "no decryption key".to_string(),
                    })];
                };
                match peel_envelope(encryption, sealed, ctx.require_sealed_onions) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(lock = %lock.lock_id, %err, "undecodable onion, bouncing lock");
                        return vec![AccountEffect::SendToPeer(AccountInput::HtlcCancel {
                            lock_id: lock.lock_id,
                            reason: err.to_string(),
                        })];
                    }
                }
            }
        };

        if payload.final_recipient {
            let Some(secret) = payload.secret else {
                return vec![AccountEffect::SendToPeer(AccountInput::HtlcCancel {
                    lock_id: lock.lock_id,
                    reason: "terminal layer carried no secret".to_string(),
                })];
            };
            if hashlock_of(&secret) != lock.hashlock {
                return vec![AccountEffect::SendToPeer(AccountInput::HtlcCancel {
                    lock_id: lock.lock_id,
                    reason: "secret does not match hashlock".to_string(),
                })];
            }
            // Reveal to our counterparty; the settling tx rides their next
            // frame.
            return vec![
                AccountEffect::SecretLearned { hashlock: lock.hashlock, secret },
                AccountEffect::SendToPeer(AccountInput::HtlcSettle {
                    lock_id: lock.lock_id,
                    secret,
                }),
            ];
        }

        let (Some(next_hop), Some(inner)) = (payload.next_hop, payload.inner_envelope) else {
            return vec![AccountEffect::SendToPeer(AccountInput::HtlcCancel {
                lock_id: lock.lock_id,
                reason: "malformed forwarding layer".to_string(),
            })];
        };

        match forward_amount(lock.amount) {
            Ok(amount) => vec![AccountEffect::ForwardHtlc {
                next_hop,
                inbound_lock_id: lock.lock_id,
                token_id: lock.token_id,
                amount,
                hashlock: lock.hashlock,
                reveal_before_height: lock.reveal_before_height.saturating_sub(1),
                timelock: lock.timelock.saturating_sub(MIN_TIMELOCK_DELTA_MS),
                envelope: *inner,
            }],
            Err(err) => vec![AccountEffect::SendToPeer(AccountInput::HtlcCancel {
                lock_id: lock.lock_id,
                reason: err.code(),
            })],
        }
    }

}
