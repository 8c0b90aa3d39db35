//! Standard-library and module-loader tests that touch the real
//! filesystem (scratch directories via tempfile) or process-global state
//! (serialized with serial_test).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use serial_test::serial;
use tempfile::TempDir;

use glipt_runtime::{InterpretError, Vm};

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture(vm: &mut Vm) -> SharedBuf {
    let buf = SharedBuf::default();
    vm.set_output(Box::new(buf.clone()));
    buf
}

// ---- fs module ----

#[test]
fn fs_read_write_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("note.txt");

    let mut vm = Vm::new();
    vm.permissions.allow_all = true;
    let out = capture(&mut vm);
    let source = format!(
        "write(\"{p}\", \"content here\")\nprint(read(\"{p}\"))\n",
        p = path.display()
    );
    vm.interpret(&source).unwrap();
    assert_eq!(out.contents(), "content here\n");
}

#[test]
fn fs_module_operations() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().display().to_string();

    let mut vm = Vm::new();
    vm.permissions.allow_all = true;
    let out = capture(&mut vm);
    let source = format!(
        "let d = \"{base}/sub\"\n\
         print(fs.mkdir(d))\n\
         print(fs.isdir(d))\n\
         write(d + \"/a.txt\", \"12345\")\n\
         print(fs.size(d + \"/a.txt\"))\n\
         print(fs.stat(d + \"/a.txt\").isFile)\n\
         print(fs.list(d))\n\
         print(fs.copy(d + \"/a.txt\", d + \"/b.txt\"))\n\
         print(fs.exists(d + \"/b.txt\"))\n\
         print(fs.move(d + \"/b.txt\", d + \"/c.txt\"))\n\
         print(fs.isfile(d + \"/b.txt\"))\n\
         print(fs.remove(d + \"/a.txt\"))\n\
         print(fs.remove(d + \"/c.txt\"))\n\
         print(fs.rmdir(d))\n\
         print(fs.exists(d))\n"
    );
    vm.interpret(&source).unwrap();
    assert_eq!(
        out.contents(),
        "true\ntrue\n5\ntrue\n[a.txt]\ntrue\ntrue\ntrue\nfalse\ntrue\ntrue\ntrue\nfalse\n"
    );
}

#[test]
fn fs_path_utilities() {
    let mut vm = Vm::new();
    let out = capture(&mut vm);
    let source = "print(fs.join(\"a\", \"b\", \"c.txt\"))\n\
                  print(fs.dirname(\"/x/y/z.txt\"))\n\
                  print(fs.basename(\"/x/y/z.txt\"))\n\
                  print(fs.extname(\"/x/y/z.txt\"))\n\
                  print(fs.dirname(\"plain\"))\n\
                  print(fs.extname(\"noext\"))\n";
    vm.interpret(source).unwrap();
    assert_eq!(out.contents(), "a/b/c.txt\n/x/y\nz.txt\n.txt\n.\n\n");
}

#[test]
fn fs_reads_are_capability_gated() {
    let dir = TempDir::new().unwrap();
    let mut vm = Vm::new();
    let out = capture(&mut vm);
    let source = format!(
        "on failure {{ print(error.type) }}\nfs.list(\"{}\")\n",
        dir.path().display()
    );
    vm.interpret(&source).unwrap();
    assert_eq!(out.contents(), "permission\n");
}

#[test]
fn read_auto_parses_json_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.json");
    std::fs::write(&path, "{\"n\":7}").unwrap();

    let mut vm = Vm::new();
    vm.permissions.allow_all = true;
    let out = capture(&mut vm);
    let source = format!("print(read(\"{}\").n)\n", path.display());
    vm.interpret(&source).unwrap();
    assert_eq!(out.contents(), "7\n");
}

// ---- module loader ----

#[test]
fn import_exposes_only_new_globals() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("lib.glipt"),
        "fn greet() { return \"hi\" }\n",
    )
    .unwrap();

    let mut vm = Vm::new();
    vm.script_path = Some(dir.path().join("main.glipt"));
    let out = capture(&mut vm);
    vm.interpret("import \"lib\"\nprint(lib.greet())\n").unwrap();
    assert_eq!(out.contents(), "hi\n");

    // The module's definitions did not leak into the top-level globals.
    let out = capture(&mut vm);
    let result = vm.interpret("print(greet())\n");
    match result {
        Err(InterpretError::Runtime(message)) => {
            assert!(message.contains("Undefined variable 'greet'."), "got: {message}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
    assert_eq!(out.contents(), "");
}

#[test]
fn import_alias_and_cache() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("settings.glipt"),
        "print(\"loading\")\nretries = 3\n",
    )
    .unwrap();

    let mut vm = Vm::new();
    vm.script_path = Some(dir.path().join("main.glipt"));
    let out = capture(&mut vm);
    // The second import hits the cache: the module body runs once.
    vm.interpret(
        "import \"settings\" as a\nimport \"settings\" as b\nprint(a.retries)\nprint(b.retries)\n",
    )
    .unwrap();
    assert_eq!(out.contents(), "loading\n3\n3\n");
}

#[test]
fn module_state_lives_in_closures() {
    // Module globals are moved into the export map at import time, so
    // stateful modules capture their state in closures instead.
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("acc.glipt"),
        "fn make() { let t = 0; fn add(n) { t = t + n; return t }; return add }\nadder = make()\n",
    )
    .unwrap();

    let mut vm = Vm::new();
    vm.script_path = Some(dir.path().join("main.glipt"));
    let out = capture(&mut vm);
    vm.interpret("import \"acc\"\nprint(acc.adder(2))\nprint(acc.adder(3))\n")
        .unwrap();
    assert_eq!(out.contents(), "2\n5\n");
}

#[test]
fn missing_module_is_a_runtime_error() {
    let dir = TempDir::new().unwrap();
    let mut vm = Vm::new();
    vm.script_path = Some(dir.path().join("main.glipt"));
    let result = vm.interpret("import \"does_not_exist\"\n");
    match result {
        Err(InterpretError::Runtime(message)) => {
            assert!(message.contains("Could not open module"), "got: {message}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn module_compile_errors_are_runtime_errors() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.glipt"), "let = nope\n").unwrap();

    let mut vm = Vm::new();
    vm.script_path = Some(dir.path().join("main.glipt"));
    let result = vm.interpret("import \"broken\"\n");
    match result {
        Err(InterpretError::Runtime(message)) => {
            assert!(message.contains("Compilation error in module 'broken'."), "got: {message}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

// ---- environment ----

#[test]
#[serial]
fn env_reads_require_a_grant() {
    // SAFETY: serialized test; nothing else reads this variable.
    unsafe { std::env::set_var("GLIPT_TEST_ENV_VALUE", "from-env") };

    let mut vm = Vm::new();
    let out = capture(&mut vm);
    vm.interpret(
        "allow env \"GLIPT_TEST_*\"\nprint(env(\"GLIPT_TEST_ENV_VALUE\"))\n",
    )
    .unwrap();
    assert_eq!(out.contents(), "from-env\n");

    let mut vm = Vm::new();
    let out = capture(&mut vm);
    vm.interpret("on failure { print(error.type) }\nprint(env(\"GLIPT_TEST_ENV_VALUE\"))\n")
        .unwrap();
    assert_eq!(out.contents(), "permission\n");

    unsafe { std::env::remove_var("GLIPT_TEST_ENV_VALUE") };
}

#[test]
#[serial]
fn sys_cwd_matches_process_cwd() {
    let expected = std::env::current_dir().unwrap().display().to_string();
    let mut vm = Vm::new();
    let out = capture(&mut vm);
    vm.interpret("print(sys.cwd())\n").unwrap();
    assert_eq!(out.contents(), format!("{expected}\n"));
}
