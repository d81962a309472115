//! Tagged user-data slot attached to a [`crate::connection::Connection`]
//! (spec.md §3, §REDESIGN FLAGS "Tagged user-data"): a sum type replacing
//! the original library's untagged union, so `get`/`set` can be checked
//! against the currently-held variant instead of trusting the caller.

use conduit_support::UserDataError;

#[derive(Debug, Clone, PartialEq)]
pub enum UserData {
    None,
    I8(i8),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ptr(usize),
    Str(String),
}

impl Default for UserData {
    #[inline]
    fn default() -> Self {
        UserData::None
    }
}

impl UserData {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, UserData::None)
    }
}

macro_rules! accessor {
    ($get:ident, $set:ident, $variant:ident, $ty:ty) => {
        impl UserData {
            #[inline]
            pub fn $get(&self) -> Result<$ty, UserDataError> {
                match self {
                    UserData::$variant(v) => Ok(v.clone()),
                    _ => Err(UserDataError::UserDataWrongTypeAsked),
                }
            }

            #[inline]
            pub fn $set(&mut self, value: $ty) -> Result<(), UserDataError> {
                match self {
                    UserData::None => {
                        *self = UserData::$variant(value);
                        Ok(())
                    }
                    UserData::$variant(_) => {
                        *self = UserData::$variant(value);
                        Ok(())
                    }
                    _ => Err(UserDataError::UserDataWrongTypeGiven),
                }
            }
        }
    };
}

accessor!(as_i8, set_i8, I8, i8);
accessor!(as_i32, set_i32, I32, i32);
accessor!(as_i64, set_i64, I64, i64);
accessor!(as_f32, set_f32, F32, f32);
accessor!(as_f64, set_f64, F64, f64);
accessor!(as_ptr, set_ptr, Ptr, usize);
accessor!(as_str, set_str, Str, String);

impl UserData {
    #[inline]
    pub fn release(&mut self) {
        *self = UserData::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_same_variant_succeeds() {
        let mut ud = UserData::None;
        ud.set_i32(42).unwrap();
        assert_eq!(ud.as_i32().unwrap(), 42);
    }

    #[test]
    fn get_wrong_variant_fails() {
        let mut ud = UserData::None;
        ud.set_i32(42).unwrap();
        assert!(matches!(ud.as_str(), Err(UserDataError::UserDataWrongTypeAsked)));
    }

    #[test]
    fn set_wrong_variant_while_occupied_fails() {
        let mut ud = UserData::None;
        ud.set_i32(42).unwrap();
        assert!(matches!(ud.set_str("x".into()), Err(UserDataError::UserDataWrongTypeGiven)));
        assert_eq!(ud.as_i32().unwrap(), 42);
    }

    #[test]
    fn release_resets_to_none() {
        let mut ud = UserData::None;
        ud.set_i32(42).unwrap();
        ud.release();
        assert!(ud.is_none());
        ud.set_str("ok".into()).unwrap();
        assert_eq!(ud.as_str().unwrap(), "ok");
    }
}
