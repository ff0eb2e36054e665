// SPDX-License-Identifier: CC0-1.0

/// Combines two `Option<Foo>` fields.
///
/// Sets `self.thing` to be `Some(other.thing)` iff `self.thing` is `None`.
/// If `self.thing` already contains a value then this macro does nothing.
macro_rules! combine_option {
    ($thing:ident, $slf:ident, $other:ident) => {
        if let (&None, Some($thing)) = (&$slf.$thing, $other.$thing) {
            $slf.$thing = Some($thing);
        }
    };
}

/// Combines to `BTreeMap` fields by extending the map in `self.thing`.
///
/// Entries already present in `self.thing` win.
macro_rules! combine_map {
    ($thing:ident, $slf:ident, $other:ident) => {
        for (key, value) in $other.$thing {
            $slf.$thing.entry(key).or_insert(value);
        }
    };
}

/// Moves `other.thing` into `self.thing`, refusing to overwrite a value already present.
// Note we purposefully do not use the fully qualified path for `UpdateError`.
macro_rules! update_option {
    ($thing:ident, $slf:ident, $other:ident) => {
        if let Some($thing) = $other.$thing {
            if $slf.$thing.is_some() {
                return Err(UpdateError::DuplicateField(stringify!($thing)));
            }
            $slf.$thing = Some($thing);
        }
    };
}

/// Adds the entries of `other.thing` to `self.thing`, refusing to replace any existing key.
macro_rules! update_map {
    ($thing:ident, $slf:ident, $other:ident) => {
        for (key, value) in $other.$thing {
            match $slf.$thing.entry(key) {
                $crate::prelude::btree_map::Entry::Vacant(empty_key) => {
                    empty_key.insert(value);
                }
                $crate::prelude::btree_map::Entry::Occupied(_) =>
                    return Err(UpdateError::DuplicateEntry(stringify!($thing))),
            }
        }
    };
}

// Note we purposefully do not use the fully qualified path for `InsertPairError`.
#[rustfmt::skip]
macro_rules! impl_psbt_insert_pair {
    ($slf:ident.$unkeyed_name:ident <= <$raw_key:ident: _>|<$raw_value:ident: $unkeyed_value_type:ty>) => {
        if $raw_key.key.is_empty() {
            if $slf.$unkeyed_name.is_none() {
                let val: $unkeyed_value_type = $crate::psbt::serialize::Deserialize::deserialize(&$raw_value)?;
                $slf.$unkeyed_name = Some(val)
            } else {
                return Err(InsertPairError::DuplicateKey($raw_key));
            }
        } else {
            return Err(InsertPairError::InvalidKeyDataNotEmpty($raw_key));
        }
    };
    ($slf:ident.$keyed_name:ident <= <$raw_key:ident: $keyed_key_type:ty>|<$raw_value:ident: $keyed_value_type:ty>) => {
        if !$raw_key.key.is_empty() {
            let key_val: $keyed_key_type = $crate::psbt::serialize::Deserialize::deserialize(&$raw_key.key)?;
            match $slf.$keyed_name.entry(key_val) {
                $crate::prelude::btree_map::Entry::Vacant(empty_key) => {
                    let val: $keyed_value_type = $crate::psbt::serialize::Deserialize::deserialize(&$raw_value)?;
                    empty_key.insert(val);
                }
                $crate::prelude::btree_map::Entry::Occupied(_) => return Err(InsertPairError::DuplicateKey($raw_key)),
            }
        } else {
            return Err(InsertPairError::InvalidKeyDataEmpty($raw_key));
        }
    };
}

#[rustfmt::skip]
macro_rules! impl_psbt_get_pair {
    ($rv:ident.push($slf:ident.$unkeyed_name:ident, $unkeyed_typeval:ident)) => {
        if let Some(ref $unkeyed_name) = $slf.$unkeyed_name {
            $rv.push($crate::psbt::raw::Pair {
                key: $crate::psbt::raw::Key {
                    type_value: $unkeyed_typeval,
                    key: vec![],
                },
                value: $crate::psbt::serialize::Serialize::serialize($unkeyed_name),
            });
        }
    };
    ($rv:ident.push_map($slf:ident.$keyed_name:ident, $keyed_typeval:ident)) => {
        for (key, val) in &$slf.$keyed_name {
            $rv.push($crate::psbt::raw::Pair {
                key: $crate::psbt::raw::Key {
                    type_value: $keyed_typeval,
                    key: $crate::psbt::serialize::Serialize::serialize(key),
                },
                value: $crate::psbt::serialize::Serialize::serialize(val),
            });
        }
    };
}
