//! Test utilities: a shell stand-in for the privileged helper.
#![allow(dead_code)]

use std::path::PathBuf;

use fsbridge::{BridgeConfig, HelperConfig, Session, UnixIdentity, UserEntry};
use tempfile::TempDir;

/// Speaks the helper protocol for a fixed set of canned responses.
///
/// Invoked as `sh mock-helper.sh <client> <server> <uid> <gid>`. Requests
/// without payload end in the client boundary with no newline, so the
/// boundary shows up glued to the front of the next command line.
pub const MOCK_HELPER: &str = r#"
client="$1"
server="$2"
uid="$3"
gid="$4"

end() {
    printf '%s' "$server"
    printf '%s' "$server" >&2
}

# FILE_TYPE IS_LINK LINK_TARGET OWNER TIMESTAMPS PATH INODE SIZE ANNOTATIONS CHECKSUM SENSITIVITY LINK_INODE
created() {
    printf 'F\n0\n\n%s\n1\n2\n3\n%s\n99\n%s\n\n\nsha256\nPRIVATE\n\n' "$uid" "$1" "$2"
}

args() {
    a1=
    a2=
    a3=
    [ "$1" -ge 1 ] && IFS= read -r a1
    [ "$1" -ge 2 ] && IFS= read -r a2
    [ "$1" -ge 3 ] && IFS= read -r a3
}

printf '%s' "$server" >&2
open_path=

while IFS= read -r line; do
    cmd=${line#"$client"}
    case "$cmd" in
    stat)
        args 2
        case "$a1" in
        */missing) echo "EXIT:-2" ;;
        */crash) exit 1 ;;
        */garbage) echo "Q"; echo "EXIT:0" ;;
        *)
            if [ "$a2" = 65536 ]; then
                echo "${a1##*/}#cloud"
            else
                case "$a1" in
                *dir) echo D ;;
                *) echo F ;;
                esac
            fi
            echo "EXIT:0"
            ;;
        esac
        ;;
    list-directory)
        args 2
        case "$a1" in
        */broken) echo F ;;
        */plain) printf 'F\n10\nD\n4096\nF\n0\n' ;;
        *) printf 'F\n10\nD\n4096\nF\n0\n'; echo "EXIT:0" ;;
        esac
        ;;
    tree)
        args 2
        printf '%s\n%s/a\n%s/a/b\n' "$a1" "$a1" "$a1"
        echo "EXIT:0"
        ;;
    read-open)
        args 1
        echo "EXIT:0"
        ;;
    read)
        args 2
        printf '%s\n' $(( 6 + ${#server} ))
        printf 'abc%sxyz' "$server"
        [ "$a1" = 1 ] && printf 'EXIT:0\n'
        ;;
    delete)
        args 1
        printf 'F\n%s\n%s\n%s\n42\n' "$uid" "$gid" "$a1"
        echo "EXIT:0"
        ;;
    move)
        args 3
        echo "$a1"
        echo "$a2"
        case "$a2" in
        *dir) printf 'D\n%s\n%s\n7\nF\n%s\n%s/sub.txt\n8\n' "$uid" "$a2" "$uid" "$a2" ;;
        *) printf 'F\n%s\n%s\n7\n' "$uid" "$a2" ;;
        esac
        echo "EXIT:0"
        ;;
    make-dir)
        args 1
        case "$a1" in
        *exists) echo "EXIT:-17" ;;
        *) created "$a1" 4096; echo "EXIT:0" ;;
        esac
        ;;
    copy)
        args 3
        created "$a2" 10
        echo "EXIT:0"
        ;;
    symlink)
        args 2
        created "$a2" 0
        echo "EXIT:0"
        ;;
    chmod)
        args 2
        if [ "$a2" = 488 ]; then
            created "$a1" 0
            echo "EXIT:0"
        else
            echo "EXIT:-22"
        fi
        ;;
    write-open)
        args 2
        open_path="$a1"
        created "$a1" 0
        echo "EXIT:0"
        ;;
    write)
        IFS= read -r data
        created "$open_path" $(( ${#data} + 1 ))
        echo "EXIT:0"
        ;;
    get-xattr)
        args 2
        echo "value-of-$a2"
        echo "EXIT:0"
        ;;
    set-xattr)
        args 3
        case "$a2" in
        user.*) echo "EXIT:0" ;;
        *) echo "EXIT:-22" ;;
        esac
        ;;
    list-xattr)
        args 1
        echo "user.a"
        echo "user.b"
        echo "EXIT:0"
        ;;
    delete-xattr)
        args 2
        case "$a2" in
        user.*) echo "EXIT:0" ;;
        *) echo "EXIT:-22" ;;
        esac
        ;;
    setfacl)
        args 1
        echo "setfacl $a1" >&2
        if [ "$a1" = "-m 'u:alice:r-X' /mnt/cephfs/home/alice/shared" ]; then
            echo "EXIT:0"
        else
            echo "EXIT:-22"
        fi
        ;;
    *)
        echo "EXIT:-1"
        ;;
    esac
    end
done
"#;

/// A mock helper script on disk. Keep it alive while sessions run.
pub struct MockHelper {
    _dir: TempDir,
    pub script: PathBuf,
}

impl Default for MockHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHelper {
    pub fn new() -> Self {
        Self::with_script(MOCK_HELPER)
    }

    pub fn with_script(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("mock-helper.sh");
        std::fs::write(&path, script).expect("Failed to write mock helper");
        Self {
            _dir: dir,
            script: path,
        }
    }

    pub fn helper_config(&self) -> HelperConfig {
        HelperConfig {
            program: "sh".to_string(),
            args: vec![self.script.to_string_lossy().into_owned()],
            handshake_timeout_ms: 5000,
            poll_interval_ms: 10,
            // Small enough that frames straddle refills
            buffer_size: 64,
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            helper: self.helper_config(),
            users: vec![alice_entry(), bob_entry()],
            ..Default::default()
        }
    }

    pub fn open_session(&self) -> Session {
        Session::open(&self.helper_config(), &alice()).expect("Failed to open session")
    }
}

pub fn alice_entry() -> UserEntry {
    UserEntry {
        cloud_user: "alice#cloud".to_string(),
        unix_user: Some("alice".to_string()),
        uid: 1000,
        gid: 1000,
    }
}

pub fn bob_entry() -> UserEntry {
    UserEntry {
        cloud_user: "bob#cloud".to_string(),
        unix_user: Some("bob".to_string()),
        uid: 1001,
        gid: 100,
    }
}

pub fn alice() -> UnixIdentity {
    UnixIdentity {
        cloud_user: "alice#cloud".to_string(),
        unix_user: "alice".to_string(),
        uid: 1000,
        gid: 1000,
    }
}
