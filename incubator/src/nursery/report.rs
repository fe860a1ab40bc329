//UTXO Incubator
//Copyright (C) 2018  The UTXO Incubator Developers

//This program is free software: you can redistribute it and/or modify
//it under the terms of the GNU Affero General Public License as published by
//the Free Software Foundation, either version 3 of the License, or
//(at your option) any later version.

//This program is distributed in the hope that it will be useful,
//but WITHOUT ANY WARRANTY; without even the implied warranty of
//MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//GNU Affero General Public License for more details.

//You should have received a copy of the GNU Affero General Public License
//along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! # Contract Maturity Reports
//!
//! Read-only projection over a channel's nursery records: how much value is
//! still in limbo, how much has been recovered, and the maturity progress
//! of every HTLC.
//!

use bitcoin::{Amount, OutPoint};

use common::BlockHeight;
use nursery::output::{BabyOutput, KidOutput};
use wallet::SpendableOutput;

/// Maturity progress of a force-closed contract.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ContractMaturityReport {
    /// The channel point of the original contract that is now awaiting
    /// maturity within the incubator.
    pub chan_point: OutPoint,

    /// The total value of funds still frozen within this contract.
    pub limbo_balance: Amount,

    /// The total value that has been successfully swept back to the
    /// user's wallet.
    pub recovered_balance: Amount,

    /// The local value of the commitment output.
    pub local_amount: Amount,

    /// The block height at which the commitment output confirmed.
    pub conf_height: BlockHeight,

    /// The input age required for the commitment output to mature.
    pub maturity_requirement: u32,

    /// The absolute height at which the commitment output matures.
    pub maturity_height: BlockHeight,

    /// A maturity report for each HTLC output in this channel.
    pub htlcs: Vec<HtlcMaturityReport>,
}

/// Maturity progress of a single HTLC output.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HtlcMaturityReport {
    /// The output that will ultimately be swept back to the wallet.
    pub outpoint: OutPoint,

    /// The value that will be swept back to the wallet.
    pub amount: Amount,

    /// The block height at which the output's parent confirmed, zero if
    /// not yet known.
    pub conf_height: BlockHeight,

    /// The input age required for this output to mature.
    pub maturity_requirement: u32,

    /// The absolute height this output matures at, zero if not yet known.
    pub maturity_height: BlockHeight,

    /// Whether the htlc is in the CLTV-timeout stage (1) or the CSV-delay
    /// stage (2). A stage-one htlc matures at its expiry height, a
    /// stage-two htlc at its confirmation height plus its CSV delay.
    pub stage: u32,
}

impl ContractMaturityReport {
    /// Create an empty report for a channel.
    pub fn new(chan_point: OutPoint) -> ContractMaturityReport {
        ContractMaturityReport {
            chan_point: chan_point,
            ..Default::default()
        }
    }

    /// Add an incubating commitment output, contributing to the limbo
    /// balance.
    pub fn add_limbo_commitment(&mut self, kid: &KidOutput) {
        self.limbo_balance += kid.amount();

        self.local_amount += kid.amount();
        self.conf_height = kid.conf_height();
        self.maturity_requirement = kid.blocks_to_maturity();

        // A set confirmation height means the maturity height is known.
        if kid.conf_height() != 0 {
            self.maturity_height = kid.conf_height() + kid.blocks_to_maturity();
        }
    }

    /// Add a swept commitment output, contributing to the recovered
    /// balance.
    pub fn add_recovered_commitment(&mut self, kid: &KidOutput) {
        self.recovered_balance += kid.amount();

        self.local_amount += kid.amount();
        self.conf_height = kid.conf_height();
        self.maturity_requirement = kid.blocks_to_maturity();
        self.maturity_height = kid.conf_height() + kid.blocks_to_maturity();
    }

    /// Add a stage-one timeout htlc still waiting for its CLTV expiry.
    pub fn add_limbo_stage1_timeout_htlc(&mut self, baby: &BabyOutput) {
        self.limbo_balance += baby.amount();

        self.htlcs.push(HtlcMaturityReport {
            outpoint: *baby.outpoint(),
            amount: baby.amount(),
            conf_height: baby.kid().conf_height(),
            maturity_requirement: 0,
            maturity_height: baby.expiry(),
            stage: 1,
        });
    }

    /// Add an incoming htlc whose second-level success transaction has not
    /// yet confirmed.
    pub fn add_limbo_stage1_success_htlc(&mut self, kid: &KidOutput) {
        self.limbo_balance += kid.amount();

        self.htlcs.push(HtlcMaturityReport {
            outpoint: *kid.outpoint(),
            amount: kid.amount(),
            conf_height: kid.conf_height(),
            maturity_requirement: kid.blocks_to_maturity(),
            maturity_height: 0,
            stage: 1,
        });
    }

    /// Add a direct HTLC on the remote party's commitment, waiting out its
    /// absolute timelock.
    pub fn add_limbo_direct_htlc(&mut self, kid: &KidOutput) {
        self.limbo_balance += kid.amount();

        self.htlcs.push(HtlcMaturityReport {
            outpoint: *kid.outpoint(),
            amount: kid.amount(),
            conf_height: kid.conf_height(),
            maturity_requirement: 0,
            maturity_height: kid.absolute_maturity(),
            stage: 2,
        });
    }

    /// Add a stage-two htlc whose CSV delay is ticking.
    pub fn add_limbo_stage2_htlc(&mut self, kid: &KidOutput) {
        self.limbo_balance += kid.amount();

        let mut report = HtlcMaturityReport {
            outpoint: *kid.outpoint(),
            amount: kid.amount(),
            conf_height: kid.conf_height(),
            maturity_requirement: kid.blocks_to_maturity(),
            maturity_height: 0,
            stage: 2,
        };

        // The first stage has confirmed, so the final maturity height of
        // the CSV delay is known.
        if kid.conf_height() != 0 {
            report.maturity_height = kid.conf_height() + kid.blocks_to_maturity();
        }

        self.htlcs.push(report);
    }

    /// Add a swept htlc output, contributing to the recovered balance.
    pub fn add_recovered_htlc(&mut self, kid: &KidOutput) {
        self.recovered_balance += kid.amount();

        self.htlcs.push(HtlcMaturityReport {
            outpoint: *kid.outpoint(),
            amount: kid.amount(),
            conf_height: kid.conf_height(),
            maturity_requirement: kid.blocks_to_maturity(),
            maturity_height: kid.conf_height() + kid.blocks_to_maturity(),
            stage: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nursery::output::tests::dummy_kid;
    use nursery::store::tests::dummy_baby;
    use wallet::WitnessType;

    #[test]
    fn commitment_balances_move_between_limbo_and_recovered() {
        let chan = OutPoint::default();
        let mut kid = dummy_kid(1, 144, WitnessType::CommitmentTimeLock, 0);

        let mut report = ContractMaturityReport::new(chan);
        report.add_limbo_commitment(&kid);
        assert_eq!(report.limbo_balance, kid.amount());
        assert_eq!(report.maturity_height, 0);

        kid.set_conf_height(500);
        let mut report = ContractMaturityReport::new(chan);
        report.add_limbo_commitment(&kid);
        assert_eq!(report.maturity_height, 644);

        let mut report = ContractMaturityReport::new(chan);
        report.add_recovered_commitment(&kid);
        assert_eq!(report.limbo_balance, Amount::ZERO);
        assert_eq!(report.recovered_balance, kid.amount());
    }

    #[test]
    fn htlc_stages_are_reported() {
        let chan = OutPoint::default();
        let mut report = ContractMaturityReport::new(chan);

        let baby = dummy_baby(2, 200, 40);
        report.add_limbo_stage1_timeout_htlc(&baby);
        assert_eq!(report.htlcs.last().unwrap().stage, 1);
        assert_eq!(report.htlcs.last().unwrap().maturity_height, 200);

        let mut stage2 = dummy_kid(3, 40, WitnessType::HtlcOfferedTimeoutSecondLevel, 0);
        stage2.set_conf_height(201);
        report.add_limbo_stage2_htlc(&stage2);
        assert_eq!(report.htlcs.last().unwrap().stage, 2);
        assert_eq!(report.htlcs.last().unwrap().maturity_height, 241);

        let direct = dummy_kid(4, 0, WitnessType::HtlcOfferedRemoteTimeout, 700);
        report.add_limbo_direct_htlc(&direct);
        assert_eq!(report.htlcs.last().unwrap().stage, 2);
        assert_eq!(report.htlcs.last().unwrap().maturity_height, 700);

        assert_eq!(
            report.limbo_balance,
            baby.amount() + stage2.amount() + direct.amount(),
        );
    }
}
