//! Packet registry
//!
//! Maps each opcode byte to its framing rule and packet factory. The
//! registry is assembled once at startup through [`PacketRegistryBuilder`]
//! and then frozen; the resulting [`PacketRegistry`] is shared behind an
//! `Arc` and read by every connection without locking.

use std::fmt;

use tracing::debug;

use crate::error::RegistryError;
use crate::protocol::packet::{Packet, PacketMetadata, PacketSizing};

/// Zero-argument constructor for a fresh packet instance
pub type PacketFactory = fn() -> Box<dyn Packet>;

fn make_packet<T: Packet + Default>() -> Box<dyn Packet> {
    Box::new(T::default())
}

/// Immutable framing metadata for one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescriptor {
    /// Opcode byte
    pub opcode: u8,
    /// Framing rule
    pub sizing: PacketSizing,
    /// Packet type name, for logging
    pub type_name: &'static str,
}

impl PacketDescriptor {
    /// Wire length as carried in descriptors (`-1` for variable)
    pub fn length(&self) -> i32 {
        self.sizing.length()
    }
}

/// Descriptor plus optional factory
///
/// Registrations without a factory are forwarded to the game loop as raw
/// frames.
#[derive(Clone, Copy)]
pub struct PacketRegistration {
    pub descriptor: PacketDescriptor,
    pub factory: Option<PacketFactory>,
}

impl fmt::Debug for PacketRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketRegistration")
            .field("descriptor", &self.descriptor)
            .field("raw", &self.factory.is_none())
            .finish()
    }
}

/// Startup-time registry builder
#[derive(Debug)]
pub struct PacketRegistryBuilder {
    entries: Box<[Option<PacketRegistration>; 256]>,
    count: usize,
}

impl PacketRegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            entries: Box::new([None; 256]),
            count: 0,
        }
    }

    /// Register a fixed-size packet type; `length` counts the opcode byte
    pub fn register_fixed<T: Packet + Default>(
        &mut self,
        opcode: u8,
        length: usize,
    ) -> Result<&mut Self, RegistryError> {
        self.insert(
            opcode,
            PacketSizing::Fixed(length),
            std::any::type_name::<T>(),
            Some(make_packet::<T>),
        )
    }

    /// Register a variable-size packet type
    pub fn register_variable<T: Packet + Default>(
        &mut self,
        opcode: u8,
    ) -> Result<&mut Self, RegistryError> {
        self.insert(
            opcode,
            PacketSizing::Variable,
            std::any::type_name::<T>(),
            Some(make_packet::<T>),
        )
    }

    /// Register a packet type using the opcode and sizing it declares
    pub fn register_from_declared_metadata<T: PacketMetadata>(
        &mut self,
    ) -> Result<&mut Self, RegistryError> {
        self.insert(
            T::OPCODE,
            T::SIZING,
            std::any::type_name::<T>(),
            Some(make_packet::<T>),
        )
    }

    /// Register an opcode whose frames are forwarded without parsing
    pub fn register_raw(
        &mut self,
        opcode: u8,
        sizing: PacketSizing,
    ) -> Result<&mut Self, RegistryError> {
        self.insert(opcode, sizing, "raw", None)
    }

    /// Freeze the registry
    pub fn build(self) -> PacketRegistry {
        debug!(packets = self.count, "Packet registry built");
        PacketRegistry {
            entries: self.entries,
            count: self.count,
        }
    }

    fn insert(
        &mut self,
        opcode: u8,
        sizing: PacketSizing,
        type_name: &'static str,
        factory: Option<PacketFactory>,
    ) -> Result<&mut Self, RegistryError> {
        if let PacketSizing::Fixed(length) = sizing {
            if length == 0 {
                return Err(RegistryError::InvalidLength { opcode, length });
            }
        }

        let slot = &mut self.entries[opcode as usize];
        if slot.is_some() {
            return Err(RegistryError::DuplicateOpcode(opcode));
        }

        *slot = Some(PacketRegistration {
            descriptor: PacketDescriptor {
                opcode,
                sizing,
                type_name,
            },
            factory,
        });
        self.count += 1;
        Ok(self)
    }
}

impl Default for PacketRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen opcode → registration table
#[derive(Debug)]
pub struct PacketRegistry {
    entries: Box<[Option<PacketRegistration>; 256]>,
    count: usize,
}

impl PacketRegistry {
    /// Start building a registry
    pub fn builder() -> PacketRegistryBuilder {
        PacketRegistryBuilder::new()
    }

    /// Look up the registration for an opcode
    #[inline]
    pub fn get(&self, opcode: u8) -> Option<&PacketRegistration> {
        self.entries[opcode as usize].as_ref()
    }

    /// Look up the descriptor for an opcode
    pub fn try_get_descriptor(&self, opcode: u8) -> Option<PacketDescriptor> {
        self.get(opcode).map(|r| r.descriptor)
    }

    /// Create a fresh packet instance for an opcode
    pub fn try_create_packet(&self, opcode: u8) -> Option<Box<dyn Packet>> {
        self.get(opcode).and_then(|r| r.factory).map(|make| make())
    }

    /// Check if an opcode is registered
    pub fn is_registered(&self, opcode: u8) -> bool {
        self.entries[opcode as usize].is_some()
    }

    /// Number of registered opcodes
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate over all descriptors in opcode order
    pub fn descriptors(&self) -> impl Iterator<Item = PacketDescriptor> + '_ {
        self.entries.iter().flatten().map(|r| r.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::{MoveRequestPacket, PingPacket, SpeechPacket};

    #[test]
    fn test_register_and_lookup() {
        let mut builder = PacketRegistry::builder();
        builder
            .register_fixed::<PingPacket>(0x73, 2)
            .unwrap()
            .register_variable::<SpeechPacket>(0x03)
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 2);
        let ping = registry.try_get_descriptor(0x73).unwrap();
        assert_eq!(ping.sizing, PacketSizing::Fixed(2));
        assert_eq!(ping.length(), 2);
        assert_eq!(registry.try_get_descriptor(0x03).unwrap().length(), -1);

        let packet = registry.try_create_packet(0x73).unwrap();
        assert_eq!(packet.opcode(), 0x73);
    }

    #[test]
    fn test_duplicate_opcode_fails() {
        let mut builder = PacketRegistry::builder();
        builder.register_fixed::<PingPacket>(0x73, 2).unwrap();
        assert_eq!(
            builder.register_fixed::<PingPacket>(0x73, 2).unwrap_err(),
            RegistryError::DuplicateOpcode(0x73)
        );
        assert_eq!(
            builder.register_raw(0x73, PacketSizing::Variable).unwrap_err(),
            RegistryError::DuplicateOpcode(0x73)
        );
    }

    #[test]
    fn test_zero_fixed_length_fails() {
        let mut builder = PacketRegistry::builder();
        assert_eq!(
            builder.register_fixed::<PingPacket>(0x73, 0).unwrap_err(),
            RegistryError::InvalidLength {
                opcode: 0x73,
                length: 0
            }
        );
        // The failed registration leaves the slot free
        assert!(builder.register_fixed::<PingPacket>(0x73, 2).is_ok());
    }

    #[test]
    fn test_unregistered_opcode() {
        let registry = PacketRegistry::builder().build();
        assert!(registry.try_create_packet(0x42).is_none());
        assert!(registry.try_get_descriptor(0x42).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_declared_metadata() {
        let mut builder = PacketRegistry::builder();
        builder
            .register_from_declared_metadata::<MoveRequestPacket>()
            .unwrap();
        let registry = builder.build();
        let descriptor = registry.try_get_descriptor(0x02).unwrap();
        assert_eq!(descriptor.sizing, PacketSizing::Fixed(7));
        assert!(descriptor.type_name.ends_with("MoveRequestPacket"));
    }

    #[test]
    fn test_raw_registration_has_no_factory() {
        let mut builder = PacketRegistry::builder();
        builder.register_raw(0xBF, PacketSizing::Variable).unwrap();
        let registry = builder.build();
        assert!(registry.is_registered(0xBF));
        assert!(registry.try_create_packet(0xBF).is_none());
        assert_eq!(registry.descriptors().count(), 1);
    }
}
