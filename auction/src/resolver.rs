use chrono::{DateTime, Utc};
use tollgate_domain::{AppError, AuctionStatus, Money};
use tollgate_store::{AuctionSnapshot, BidPlan, NewBid};
use tracing::debug;
use uuid::Uuid;

/// Resolves a single manual bid against a locked auction snapshot
/// (spec.md §4.5 steps 6-9). Kept free of any database access so it can be
/// exercised directly with hand-built snapshots, the same separation the
/// teacher draws between `planner::sizing::derive_execution_plan` (pure
/// decision logic) and `session::repository_sqlx` (the transaction that
/// applies it).
///
/// - **Case A** — no competing auto-bid, or the highest one bids below
///   `amount`: the manual bid wins outright.
/// - **Case B** — the highest competing auto-bid's cap is at or above
///   `amount`: a follow-up auto-bid is placed for that bidder at
///   `amount + increment`, capped at their `max_amount`. That follow-up
///   bid is the one that ends up winning.
/// - **Tie-break** — a manual bid at exactly the competing cap loses to
///   the earlier auto-bidder: the follow-up bid is capped to the same
///   amount, so the auto-bidder's bid stands as the higher-priority write.
pub fn resolve_bid(
    snapshot: &AuctionSnapshot,
    actor_id: Uuid,
    amount: Money,
    now: DateTime<Utc>,
) -> Result<BidPlan, AppError> {
    if snapshot.status != AuctionStatus::Active {
        return Err(AppError::Conflict("auction is not active".into()));
    }
    if now >= snapshot.end_time {
        return Err(AppError::Conflict("auction has already ended".into()));
    }

    let minimum = snapshot
        .current_price
        .checked_add(snapshot.bid_increment)
        .ok_or_else(|| AppError::internal("auction", anyhow::anyhow!("price overflow")))?;

    if amount < minimum {
        return Err(AppError::BidTooLow { minimum });
    }

    let highest_competitor = snapshot.competing_auto_bids.first().copied();

    let (bids, new_current_price, deactivate) = match highest_competitor {
        None => {
            debug!(auction_id = %snapshot.id, %amount, "case A: no competing auto-bid");
            (
                vec![NewBid {
                    id: Uuid::new_v4(),
                    bidder_id: actor_id,
                    amount,
                    is_auto_bid: false,
                }],
                amount,
                vec![],
            )
        }
        Some(h) if h.max_amount < amount => {
            debug!(auction_id = %snapshot.id, %amount, competitor_cap = %h.max_amount, "case A: manual bid exceeds competing cap");
            (
                vec![NewBid {
                    id: Uuid::new_v4(),
                    bidder_id: actor_id,
                    amount,
                    is_auto_bid: false,
                }],
                amount,
                vec![h.bidder_id],
            )
        }
        Some(h) => {
            let follow_up = amount
                .checked_add(snapshot.bid_increment)
                .unwrap_or(h.max_amount)
                .min(h.max_amount);
            let capped = follow_up >= h.max_amount;

            debug!(
                auction_id = %snapshot.id,
                %amount,
                competitor_cap = %h.max_amount,
                %follow_up,
                capped,
                "case B: competing auto-bid responds"
            );

            (
                vec![
                    NewBid {
                        id: Uuid::new_v4(),
                        bidder_id: actor_id,
                        amount,
                        is_auto_bid: false,
                    },
                    NewBid {
                        id: Uuid::new_v4(),
                        bidder_id: h.bidder_id,
                        amount: follow_up,
                        is_auto_bid: true,
                    },
                ],
                follow_up,
                if capped { vec![h.bidder_id] } else { vec![] },
            )
        }
    };

    let snipe_window = chrono::Duration::minutes(snapshot.snipe_protection_minutes);
    let new_end_time = if snapshot.end_time - now < snipe_window {
        Some(now + snipe_window)
    } else {
        None
    };

    Ok(BidPlan {
        bids,
        new_current_price,
        deactivate_auto_bids: deactivate,
        new_end_time,
    })
}

/// `setAutoBid`'s resolution half (spec.md §4.5 "runs an analogous
/// protocol"): the new auto-bid doesn't carry a manual amount of its own,
/// so it competes at the cheapest amount that would currently win —
/// `currentPrice + increment` — capped at `max_amount`, reusing
/// [`resolve_bid`]'s case A/B/tie-break logic and relabelling the
/// resulting bid as an auto-bid. If `max_amount` can't even meet that
/// floor the auto-bid is recorded but doesn't trigger a bid yet.
pub fn resolve_auto_bid(
    snapshot: &AuctionSnapshot,
    actor_id: Uuid,
    max_amount: Money,
    now: DateTime<Utc>,
) -> Result<BidPlan, AppError> {
    if snapshot.status != AuctionStatus::Active {
        return Err(AppError::Conflict("auction is not active".into()));
    }
    if now >= snapshot.end_time {
        return Err(AppError::Conflict("auction has already ended".into()));
    }

    let minimum = snapshot
        .current_price
        .checked_add(snapshot.bid_increment)
        .ok_or_else(|| AppError::internal("auction", anyhow::anyhow!("price overflow")))?;

    if max_amount < minimum {
        debug!(auction_id = %snapshot.id, %max_amount, %minimum, "auto-bid cap below current floor, no bid triggered");
        return Ok(BidPlan {
            bids: vec![],
            new_current_price: snapshot.current_price,
            deactivate_auto_bids: vec![],
            new_end_time: None,
        });
    }

    let mut plan = resolve_bid(snapshot, actor_id, minimum, now)?;
    for bid in plan.bids.iter_mut() {
        if bid.bidder_id == actor_id {
            bid.is_auto_bid = true;
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_store::AutoBidRow;

    fn snapshot(current_price_cents: i64, increment_cents: i64, auto_bids: Vec<AutoBidRow>) -> AuctionSnapshot {
        let now = Utc::now();
        AuctionSnapshot {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            current_price: Money::from_cents(current_price_cents),
            bid_increment: Money::from_cents(increment_cents),
            start_time: now - chrono::Duration::hours(1),
            end_time: now + chrono::Duration::hours(1),
            snipe_protection_minutes: 2,
            status: AuctionStatus::Active,
            version: 0,
            next_sequence: 1,
            competing_auto_bids: auto_bids,
        }
    }

    #[test]
    fn case_a_no_competitor() {
        let snap = snapshot(1_000, 100, vec![]);
        let plan = resolve_bid(&snap, Uuid::new_v4(), Money::from_cents(1_100), Utc::now()).unwrap();
        assert_eq!(plan.bids.len(), 1);
        assert_eq!(plan.new_current_price, Money::from_cents(1_100));
        assert!(plan.deactivate_auto_bids.is_empty());
    }

    #[test]
    fn case_a_exceeds_competitor_cap() {
        let competitor = Uuid::new_v4();
        let snap = snapshot(
            1_000,
            100,
            vec![AutoBidRow {
                bidder_id: competitor,
                max_amount: Money::from_cents(1_200),
            }],
        );
        let plan = resolve_bid(&snap, Uuid::new_v4(), Money::from_cents(1_500), Utc::now()).unwrap();
        assert_eq!(plan.new_current_price, Money::from_cents(1_500));
        assert_eq!(plan.deactivate_auto_bids, vec![competitor]);
    }

    #[test]
    fn case_b_competitor_responds_uncapped() {
        let competitor = Uuid::new_v4();
        let snap = snapshot(
            1_000,
            100,
            vec![AutoBidRow {
                bidder_id: competitor,
                max_amount: Money::from_cents(5_000),
            }],
        );
        let plan = resolve_bid(&snap, Uuid::new_v4(), Money::from_cents(1_100), Utc::now()).unwrap();
        assert_eq!(plan.bids.len(), 2);
        assert_eq!(plan.new_current_price, Money::from_cents(1_200));
        assert!(plan.deactivate_auto_bids.is_empty());
    }

    #[test]
    fn tie_break_favors_earlier_auto_bidder() {
        let competitor = Uuid::new_v4();
        let snap = snapshot(
            1_000,
            100,
            vec![AutoBidRow {
                bidder_id: competitor,
                max_amount: Money::from_cents(1_100),
            }],
        );
        let plan = resolve_bid(&snap, Uuid::new_v4(), Money::from_cents(1_100), Utc::now()).unwrap();
        assert_eq!(plan.new_current_price, Money::from_cents(1_100));
        assert_eq!(plan.deactivate_auto_bids, vec![competitor]);
        assert_eq!(plan.bids[1].bidder_id, competitor);
        assert_eq!(plan.bids[1].amount, Money::from_cents(1_100));
    }

    #[test]
    fn rejects_bid_below_minimum() {
        let snap = snapshot(1_000, 100, vec![]);
        let err = resolve_bid(&snap, Uuid::new_v4(), Money::from_cents(1_050), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::BidTooLow { .. }));
    }

    #[test]
    fn rejects_bid_on_ended_auction() {
        let mut snap = snapshot(1_000, 100, vec![]);
        snap.end_time = Utc::now() - chrono::Duration::minutes(1);
        let err = resolve_bid(&snap, Uuid::new_v4(), Money::from_cents(1_100), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn extends_end_time_within_snipe_window() {
        let mut snap = snapshot(1_000, 100, vec![]);
        let now = Utc::now();
        snap.end_time = now + chrono::Duration::seconds(30);
        let plan = resolve_bid(&snap, Uuid::new_v4(), Money::from_cents(1_100), now).unwrap();
        assert!(plan.new_end_time.is_some());
        assert!(plan.new_end_time.unwrap() > snap.end_time);
    }

    #[test]
    fn auto_bid_below_floor_records_no_bid() {
        let snap = snapshot(1_000, 100, vec![]);
        let actor = Uuid::new_v4();
        let plan = resolve_auto_bid(&snap, actor, Money::from_cents(1_050), Utc::now()).unwrap();
        assert!(plan.bids.is_empty());
        assert_eq!(plan.new_current_price, Money::from_cents(1_000));
    }

    #[test]
    fn auto_bid_at_floor_wins_and_is_flagged_auto() {
        let snap = snapshot(1_000, 100, vec![]);
        let actor = Uuid::new_v4();
        let plan = resolve_auto_bid(&snap, actor, Money::from_cents(2_000), Utc::now()).unwrap();
        assert_eq!(plan.bids.len(), 1);
        assert!(plan.bids[0].is_auto_bid);
        assert_eq!(plan.new_current_price, Money::from_cents(1_100));
    }
}
