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


//! # Global table of all log codes
//!

use nursery::*;

use UnstructuredTrace;
use UnstructuredDebug;
use UnstructuredInfo;
use UnstructuredWarn;
use UnstructuredError;
use UnstructuredFatal;

macro_rules! impl_log(
    ($log_id:expr, $level:ident, $struct:ident $(::$next:ident)*, $desc:expr) => {
        impl_log!($log_id, $level, $struct$(::$next)*, $desc,);
    };
    ($log_id:expr, $level:ident, $struct:ident$(::$next:ident)*, $desc:expr,) => {
        impl $crate::Log for $struct$(::$next)* {
            const SEVERITY: $crate::Severity = $crate::Severity::$level;
            const LOG_ID: &'static str = $log_id;

            fn desc(&self) -> &str {
                $desc
            }
        }
    };
    ($log_id:expr, $level:ident, $struct:ident$(::$next:ident)*<$($lt:tt),*>, $desc:expr) => {
        impl_log!($log_id, $level, $struct$(::$next)*<$($lt),*>, $desc,);
    };
    ($log_id:expr, $level:ident, $struct:ident$(::$next:ident)*<$($lt:tt),*>, $desc:expr,) => {
        impl<$($lt),*> $crate::Log for $struct$(::$next)*<$($lt),*> {
            const SEVERITY: $crate::Severity = $crate::Severity::$level;
            const LOG_ID: &'static str = $log_id;

            fn desc(&self) -> &str {
                $desc
            }
        }
    };
);

impl_log!("N-0001", Trace, UnstructuredTrace, "unstructured log");
impl_log!("N-0002", Debug, UnstructuredDebug, "unstructured log");
impl_log!("N-0003", Info, UnstructuredInfo, "unstructured log");
impl_log!("N-0004", Warn, UnstructuredWarn, "unstructured log");
impl_log!("N-0005", Error, UnstructuredError, "unstructured log");
impl_log!("N-0006", Fatal, UnstructuredFatal, "unstructured log");

impl_log!("N-1000", Info, IncubatorStarted, "incubator started");
impl_log!("N-1001", Info, IncubatorShutdown, "incubator shutting down");
impl_log!("N-1002", Info, IncubatingChannel, "incubating channel outputs");
impl_log!("N-1003", Info, ImmediateCribSweep, "sweeping already-expired crib output");
impl_log!("N-1004", Debug, GraduatingClass, "graduating class at height");
impl_log!("N-1005", Info, FinalizedKindergarten, "finalized kindergarten sweep");
impl_log!("N-1006", Error, ClassGraduationFailed, "class graduation failed");
impl_log!("N-1007", Info, SweepBroadcast, "broadcast kindergarten sweep");
impl_log!("N-1008", Info, TimeoutTxBroadcast, "broadcast htlc timeout tx");
impl_log!("N-1009", Debug, DoubleSpendIgnored, "broadcast was a double spend");
impl_log!("N-1010", Debug, RegisteredConfWatch, "registered confirmation watch");
impl_log!("N-1011", Info, OutputPromoted, "output promoted to kindergarten");
impl_log!("N-1012", Info, KindergartenGraduated, "kindergarten class graduated");
impl_log!("N-1013", Info, ChannelRemoved, "channel removed from nursery");
impl_log!("N-1014", Warn, ChannelCloseSummaryMissing, "close summary missing");
impl_log!("N-1015", Info, ReplayingMissedBlocks, "replaying missed blocks");
impl_log!("N-1016", Info, RegraduatingHeight, "re-registering graduated height");
impl_log!("N-1017", Error, NotifierChannelClosed, "notification channel closed");

impl_log!("N-2000", Info, StrayInputCut, "uneconomical input diverted");
impl_log!("N-2001", Info, StraySweepBroadcast, "broadcast stray sweep");

impl_log!("N-3000", Info, NewFeeEstimate, "new fee estimate");
impl_log!("N-3001", Warn, FeeEstimateUnavailable, "fee estimate unavailable");
impl_log!("N-3002", Trace, RpcRequest<'a>, "rpc request");
impl_log!("N-3003", Trace, RpcResponse<'a>, "rpc response");
