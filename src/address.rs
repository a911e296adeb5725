// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Script-hash address derivation. The address is the base58check rendering of the network
//! version byte followed by the `HASH160` of the serialized locking script.

use bitcoin::util::address::{Address, Payload};

use crate::blockchain::Network;
use crate::script::LockingScript;

/// Derive the P2SH address of the locking script on the given network. Pure and deterministic.
pub fn derive(script: &LockingScript, network: Network) -> Address {
    Address {
        network: network.into(),
        payload: Payload::ScriptHash(script.script_hash()),
    }
}

/// Check that an address is valid on the network. Testnet addresses are accepted on local
/// networks, they share version bytes.
pub fn on_network(address: &Address, network: Network) -> bool {
    Network::from(address.network).p2sh_prefix() == network.p2sh_prefix()
}
