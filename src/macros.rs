/// Implements string serialization and deserialization for types that
/// implement `Display` and `FromStr`.
macro_rules! impl_str_serde {
    ($type:ty, $expectation:expr) => {
        impl ::serde::Serialize for $type {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $type {
            fn deserialize<D: ::serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                struct V;

                impl<'de> ::serde::de::Visitor<'de> for V {
                    type Value = $type;

                    fn expecting(
                        &self,
                        formatter: &mut ::std::fmt::Formatter<'_>,
                    ) -> ::std::fmt::Result {
                        formatter.write_str($expectation)
                    }

                    fn visit_str<E: ::serde::de::Error>(
                        self,
                        value: &str,
                    ) -> Result<Self::Value, E> {
                        value.parse().map_err(::serde::de::Error::custom)
                    }
                }

                deserializer.deserialize_str(V)
            }
        }
    };
}

/// Internal diagnostics.
///
/// The client never lets pipeline errors escape into the host application;
/// they are reported here instead. Output goes to stderr when the `debug`
/// option is enabled, or to the `log` crate with the `debug-logs` feature.
macro_rules! flare_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug-logs")]
        {
            log::debug!(target: "flare", $($arg)*);
        }
        #[cfg(not(feature = "debug-logs"))]
        {
            if $crate::debug_enabled() {
                eprint!("[flare] ");
                eprintln!($($arg)*);
            }
        }
    };
}
