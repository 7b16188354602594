//! Convenient conversion traits.
//
// Methods across the crate take `impl ToHeaderName`, `impl ToUrl` and friends rather than the
// concrete `http`/`url` types, so that string literals can be passed directly. Like the `FromStr`
// conversions they wrap, these conversions panic on invalid input; use the concrete types with
// explicit error handling when the source value is untrusted.
//
// The traits are sealed: the conversion method lives on a private supertrait so that other crates
// can neither implement nor call it.
use crate::backend::Backend;
use ::url::Url;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};

pub use self::backend::ToBackend;
pub use self::header_name::ToHeaderName;
pub use self::header_value::ToHeaderValue;
pub use self::method::ToMethod;
pub use self::status_code::ToStatusCode;
pub use self::url::ToUrl;

/// Implements a sealed conversion trait for the target type itself, references to it, and the
/// string types that parse into it.
macro_rules! convert_stringy {
    ( $type:ty, $trait:ident, $fail_msg:literal ) => {
        pub trait Sealed {
            fn into_owned(self) -> $type;
        }

        impl $trait for $type {}
        impl $trait for &$type {}
        impl $trait for &str {}
        impl $trait for String {}
        impl $trait for &String {}

        impl Sealed for $type {
            fn into_owned(self) -> $type {
                self
            }
        }

        impl Sealed for &$type {
            fn into_owned(self) -> $type {
                self.clone()
            }
        }

        impl Sealed for &str {
            fn into_owned(self) -> $type {
                self.parse::<$type>()
                    .unwrap_or_else(|_| panic!(concat!($fail_msg, ": {}"), self))
            }
        }

        impl Sealed for String {
            fn into_owned(self) -> $type {
                Sealed::into_owned(self.as_str())
            }
        }

        impl Sealed for &String {
            fn into_owned(self) -> $type {
                Sealed::into_owned(self.as_str())
            }
        }
    };
}

mod header_name {
    use super::*;

    /// Types that can be converted to a [`HeaderName`].
    ///
    /// | Source type                                         | Can panic? | Non-panicking conversion   |
    /// |-----------------------------------------------------|------------|----------------------------|
    /// | [`HeaderName` or `&HeaderName`][`HeaderName`]       | No         | N/A                        |
    /// | [`&str`][`str`], [`String`, or `&String`][`String`] | Yes        | [`HeaderName::try_from()`] |
    pub trait ToHeaderName: Sealed {}

    convert_stringy!(HeaderName, ToHeaderName, "invalid HTTP header name");
}

mod header_value {
    use super::*;

    /// Types that can be converted to a [`HeaderValue`].
    ///
    /// | Source type                                         | Can panic? | Non-panicking conversion    |
    /// |-----------------------------------------------------|------------|-----------------------------|
    /// | [`HeaderValue` or `&HeaderValue`][`HeaderValue`]    | No         | N/A                         |
    /// | [`HeaderName` or `&HeaderName`][`HeaderName`]       | No         | N/A                         |
    /// | [`&str`][`str`], [`String`, or `&String`][`String`] | Yes        | [`HeaderValue::try_from()`] |
    pub trait ToHeaderValue: Sealed {}

    convert_stringy!(HeaderValue, ToHeaderValue, "invalid HTTP header value");

    impl ToHeaderValue for HeaderName {}
    impl ToHeaderValue for &HeaderName {}

    impl Sealed for HeaderName {
        fn into_owned(self) -> HeaderValue {
            HeaderValue::from(self)
        }
    }

    impl Sealed for &HeaderName {
        fn into_owned(self) -> HeaderValue {
            HeaderValue::from(self.clone())
        }
    }
}

mod method {
    use super::*;

    /// Types that can be converted to a [`Method`].
    ///
    /// | Source type                                         | Can panic? | Non-panicking conversion |
    /// |-----------------------------------------------------|------------|--------------------------|
    /// | [`Method` or `&Method`][`Method`]                   | No         | N/A                      |
    /// | [`&str`][`str`], [`String`, or `&String`][`String`] | Yes        | [`Method::try_from()`]   |
    pub trait ToMethod: Sealed {}

    convert_stringy!(Method, ToMethod, "invalid HTTP method");
}

mod url {
    use super::*;

    /// Types that can be converted to a [`Url`].
    ///
    /// | Source type                                         | Can panic? | Non-panicking conversion |
    /// |-----------------------------------------------------|------------|--------------------------|
    /// | [`Url or &Url`][`Url`]                              | No         | N/A                      |
    /// | [`&str`][`str`], [`String`, or `&String`][`String`] | Yes        | [`Url::parse()`]         |
    pub trait ToUrl: Sealed {}

    convert_stringy!(Url, ToUrl, "invalid URL");
}

mod backend {
    use super::*;

    /// Types that can be converted to a [`Backend`].
    ///
    /// | Source type                                         | Can panic? | Non-panicking conversion |
    /// |-----------------------------------------------------|------------|--------------------------|
    /// | [`Backend or &Backend`][`Backend`]                  | No         | N/A                      |
    /// | [`&str`][`str`], [`String`, or `&String`][`String`] | Yes        | [`Backend::from_name()`] |
    pub trait ToBackend: Sealed {}

    convert_stringy!(Backend, ToBackend, "invalid backend");
}

mod status_code {
    use super::*;

    /// Types that can be converted to a [`StatusCode`].
    ///
    /// | Source type    | Can panic? | Non-panicking conversion   |
    /// |----------------|------------|----------------------------|
    /// | [`StatusCode`] | No         | N/A                        |
    /// | [`u16`]        | Yes        | [`StatusCode::try_from()`] |
    pub trait ToStatusCode: Sealed {}

    impl ToStatusCode for StatusCode {}

    impl ToStatusCode for u16 {}

    pub trait Sealed {
        fn to_status_code(self) -> StatusCode;
    }

    impl Sealed for StatusCode {
        fn to_status_code(self) -> StatusCode {
            self
        }
    }

    impl Sealed for u16 {
        fn to_status_code(self) -> StatusCode {
            StatusCode::from_u16(self)
                .unwrap_or_else(|_| panic!("invalid HTTP status code: {}", self))
        }
    }
}
