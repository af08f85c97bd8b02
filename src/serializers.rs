// This file contains the serializers for the bitfield records of the ondisk formats.  They go through a plain mirror struct with one member per field.
// Deserialization fails if a value does not fit its bit field.

use crate::ondisk::*;

// Note: This is written such that it will fail if the underlying struct has fields added/removed/renamed, if those have a public setter.
macro_rules! make_serde{($StructName:ident, [$($field_name:ident: $field_type:ty),* $(,)?]
) => (
	paste::paste!{
		#[derive(serde::Serialize, serde::Deserialize)]
		#[serde(deny_unknown_fields)]
		struct [<Serde $StructName>] {
			$(
			$field_name: $field_type,
			)*
		}
		impl<'de> serde::de::Deserialize<'de> for $StructName {
			fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
			where D: serde::de::Deserializer<'de>, {
				let config = [<Serde $StructName>]::deserialize(deserializer)?;
				Ok($StructName::new()
				$(
				.[<with_ $field_name _checked>](config.$field_name)
				.map_err(|_| serde::de::Error::custom(concat!(stringify!($field_name), " is out of range")))?
				)*)
			}
		}
		impl serde::Serialize for $StructName {
			fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
			where S: serde::Serializer, {
				[<Serde $StructName>] {
					$(
						$field_name: self.$field_name(),
					)*
				}.serialize(serializer)
			}
		}
	}
)}

make_serde!(
	DirectoryAdditionalInfo,
	[max_size_in_4k: u16, spi_block_size_in_4k: u8, base_address_in_4k: u16, address_mode: u8]
);
make_serde!(PspDirectoryEntryAttrs, [type_: u8, sub_program: u8, rom_id: u8, writable: bool, instance: u8]);
make_serde!(
	BhdDirectoryEntryAttrs,
	[
		type_: u8,
		region_type: u8,
		reset_image: bool,
		copy: bool,
		read_only: bool,
		compressed: bool,
		instance: u8,
		sub_program: u8,
		rom_id: u8,
		writable: bool,
	]
);
